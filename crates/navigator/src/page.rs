//! A loaded page and the DOM work done against it.
//!
//! `scraper::Html` is `!Send`, so a `Page` keeps the raw markup and parses it
//! inside each call; nothing parsed outlives the call that created it.

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::fetch::{FetchRequest, FormMethod};
use crate::{ExtractedCell, ExtractedRow, Extraction, NavigationError};

/// Where a click leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ClickTarget {
    Follow(Url),
    Submit(FetchRequest),
}

#[derive(Debug, Clone)]
pub struct Page {
    url: Url,
    body: String,
}

fn selector(raw: &str) -> Result<Selector, NavigationError> {
    Selector::parse(raw).map_err(|_| NavigationError::InvalidSelector(raw.to_string()))
}

fn collapse(text: impl Iterator<Item = impl AsRef<str>>) -> String {
    let joined = text.map(|t| t.as_ref().to_string()).collect::<Vec<_>>().join(" ");
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl Page {
    pub fn new(url: Url, body: impl Into<String>) -> Self {
        Self {
            url,
            body: body.into(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn contains(&self, raw_selector: &str) -> Result<bool, NavigationError> {
        let sel = selector(raw_selector)?;
        let doc = Html::parse_document(&self.body);
        let found = doc.select(&sel).next().is_some();
        Ok(found)
    }

    /// Returns the first configured marker found in the page title or
    /// top-level headings.
    pub fn block_marker(&self, markers: &[String]) -> Option<String> {
        if markers.is_empty() {
            return None;
        }
        let doc = Html::parse_document(&self.body);
        let heading_sel = Selector::parse("title, h1, h2").ok()?;
        let headline = doc
            .select(&heading_sel)
            .map(|el| collapse(el.text()))
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        markers
            .iter()
            .find(|m| !m.is_empty() && headline.contains(&m.to_lowercase()))
            .cloned()
    }

    pub fn extract(&self, raw_selector: &str) -> Result<Extraction, NavigationError> {
        let sel = selector(raw_selector)?;
        let doc = Html::parse_document(&self.body);
        let mut extraction = Extraction::default();

        for el in doc.select(&sel) {
            if el.value().name() == "table" {
                let (headers, rows) = self.table(el)?;
                if extraction.headers.is_empty() {
                    extraction.headers = headers;
                }
                extraction.rows.extend(rows);
            } else {
                let option_sel = selector("option")?;
                let mut cells = vec![self.cell(el)];
                cells.extend(el.select(&option_sel).map(|opt| self.cell(opt)));
                extraction.rows.push(ExtractedRow { cells });
            }
        }

        Ok(extraction)
    }

    fn table(&self, table: ElementRef<'_>) -> Result<(Vec<String>, Vec<ExtractedRow>), NavigationError> {
        let head_sel = selector("thead th")?;
        let row_sel = selector("tr")?;
        let td_sel = selector("td")?;
        let th_sel = selector("th")?;
        let cell_sel = selector("th, td")?;

        let mut headers: Vec<String> = table.select(&head_sel).map(|th| collapse(th.text())).collect();
        let mut rows = Vec::new();

        for tr in table.select(&row_sel) {
            let has_data = tr.select(&td_sel).next().is_some();
            if !has_data {
                if headers.is_empty() && tr.select(&th_sel).next().is_some() {
                    headers = tr.select(&th_sel).map(|th| collapse(th.text())).collect();
                }
                continue;
            }
            let cells = tr.select(&cell_sel).map(|c| self.cell(c)).collect();
            rows.push(ExtractedRow { cells });
        }

        Ok((headers, rows))
    }

    fn cell(&self, el: ElementRef<'_>) -> ExtractedCell {
        let attrs: BTreeMap<String, String> = el
            .value()
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let raw_href = el.value().attr("href").map(str::to_string).or_else(|| {
            let link_sel = Selector::parse("a[href]").ok()?;
            el.select(&link_sel)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(str::to_string)
        });
        let href = raw_href
            .filter(|h| !h.trim().is_empty() && !h.starts_with("javascript:"))
            .and_then(|h| self.url.join(h.trim()).ok())
            .map(|u| u.to_string());

        ExtractedCell {
            tag: el.value().name().to_string(),
            text: collapse(el.text()),
            href,
            attrs,
        }
    }

    /// Name of the form control `raw_selector` designates.
    pub(crate) fn control_name(&self, raw_selector: &str) -> Result<String, NavigationError> {
        let sel = selector(raw_selector)?;
        let doc = Html::parse_document(&self.body);
        let el = doc.select(&sel).next().ok_or_else(|| NavigationError::NotFound {
            what: format!("form control `{raw_selector}` on {}", self.url),
        })?;
        match el.value().name() {
            "input" | "select" | "textarea" => {}
            other => {
                return Err(NavigationError::NotFound {
                    what: format!("`{raw_selector}` matched <{other}>, not a form control"),
                });
            }
        }
        el.value()
            .attr("name")
            .map(str::to_string)
            .ok_or_else(|| NavigationError::NotFound {
                what: format!("name attribute on `{raw_selector}`"),
            })
    }

    pub(crate) fn click_target(
        &self,
        raw_selector: &str,
        pending: &[(String, String)],
    ) -> Result<ClickTarget, NavigationError> {
        let sel = selector(raw_selector)?;
        let doc = Html::parse_document(&self.body);
        let el = doc.select(&sel).next().ok_or_else(|| NavigationError::NotFound {
            what: format!("clickable `{raw_selector}` on {}", self.url),
        })?;

        if let Some(href) = el.value().attr("href") {
            let url = self.url.join(href.trim()).map_err(|_| NavigationError::NotFound {
                what: format!("link target `{href}`"),
            })?;
            return Ok(ClickTarget::Follow(url));
        }

        let form = el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|node| node.value().name() == "form")
            .ok_or_else(|| NavigationError::NotFound {
                what: format!("`{raw_selector}` is neither a link nor inside a form"),
            })?;

        let mut pairs = self.form_defaults(form, el)?;
        for (name, value) in pending {
            pairs.retain(|(n, _)| n != name);
            pairs.push((name.clone(), value.clone()));
        }

        let method = match form.value().attr("method") {
            Some(m) if m.eq_ignore_ascii_case("post") => FormMethod::Post,
            _ => FormMethod::Get,
        };
        let mut action = match form.value().attr("action").map(str::trim) {
            Some(a) if !a.is_empty() => self.url.join(a).map_err(|_| NavigationError::NotFound {
                what: format!("form action `{a}`"),
            })?,
            _ => self.url.clone(),
        };
        action.set_fragment(None);

        let request = match method {
            FormMethod::Get => {
                action.set_query(None);
                if !pairs.is_empty() {
                    action.query_pairs_mut().extend_pairs(pairs.iter());
                }
                FetchRequest::get(action)
            }
            FormMethod::Post => FetchRequest {
                method,
                url: action,
                form: pairs,
            },
        };
        Ok(ClickTarget::Submit(request))
    }

    /// Successful controls of `form` as a browser would submit them when
    /// `submitter` is clicked.
    fn form_defaults(
        &self,
        form: ElementRef<'_>,
        submitter: ElementRef<'_>,
    ) -> Result<Vec<(String, String)>, NavigationError> {
        let control_sel = selector("input[name], select[name], textarea[name]")?;
        let option_sel = selector("option")?;
        let mut pairs = Vec::new();

        for control in form.select(&control_sel) {
            let value = control.value();
            let Some(name) = value.attr("name") else {
                continue;
            };
            match value.name() {
                "input" => {
                    let kind = value.attr("type").unwrap_or("text").to_ascii_lowercase();
                    match kind.as_str() {
                        "checkbox" | "radio" => {
                            if value.attr("checked").is_some() {
                                pairs.push((name.to_string(), value.attr("value").unwrap_or("on").to_string()));
                            }
                        }
                        "submit" | "image" | "button" => {
                            if control.id() == submitter.id() {
                                pairs.push((name.to_string(), value.attr("value").unwrap_or_default().to_string()));
                            }
                        }
                        "reset" | "file" => {}
                        _ => pairs.push((name.to_string(), value.attr("value").unwrap_or_default().to_string())),
                    }
                }
                "select" => {
                    let options: Vec<ElementRef<'_>> = control.select(&option_sel).collect();
                    let option_value =
                        |opt: &ElementRef<'_>| opt.value().attr("value").map(str::to_string).unwrap_or_else(|| collapse(opt.text()));
                    let selected: Vec<String> = options
                        .iter()
                        .filter(|opt| opt.value().attr("selected").is_some())
                        .map(option_value)
                        .collect();
                    if !selected.is_empty() {
                        pairs.extend(selected.into_iter().map(|v| (name.to_string(), v)));
                    } else if value.attr("multiple").is_none() {
                        if let Some(first) = options.first() {
                            pairs.push((name.to_string(), option_value(first)));
                        }
                    }
                }
                "textarea" => pairs.push((name.to_string(), control.text().collect::<String>())),
                _ => {}
            }
        }

        if submitter.value().name() == "button" {
            if let Some(name) = submitter.value().attr("name") {
                pairs.push((name.to_string(), submitter.value().attr("value").unwrap_or_default().to_string()));
            }
        }

        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> Page {
        Page::new(Url::parse("https://vendor.test/products/caps").unwrap(), body)
    }

    #[test]
    fn extracts_table_headers_and_absolute_links() {
        let p = page(
            r#"<table id="r">
                 <thead><tr><th>Part No.</th><th>Capacitance</th></tr></thead>
                 <tbody>
                   <tr><td><a href="/p/GRM1">GRM1</a></td><td>1.0 µF</td></tr>
                   <tr><td><a href="detail?id=2">GRM2</a></td><td>1.1 µF</td></tr>
                 </tbody>
               </table>"#,
        );
        let ex = p.extract("table#r").unwrap();
        assert_eq!(ex.headers, vec!["Part No.", "Capacitance"]);
        assert_eq!(ex.rows.len(), 2);
        assert_eq!(ex.rows[0].cells[0].text, "GRM1");
        assert_eq!(ex.rows[0].cells[0].href.as_deref(), Some("https://vendor.test/p/GRM1"));
        assert_eq!(
            ex.rows[1].cells[0].href.as_deref(),
            Some("https://vendor.test/products/detail?id=2")
        );
    }

    #[test]
    fn header_row_without_thead_is_detected() {
        let p = page(
            "<table class='spec'><tr><th>Label</th><th>Value</th></tr>\
             <tr><th>Rated Voltage</th><td>16 V</td></tr></table>",
        );
        let ex = p.extract("table.spec").unwrap();
        assert_eq!(ex.headers, vec!["Label", "Value"]);
        assert_eq!(ex.rows.len(), 1);
        assert_eq!(ex.rows[0].cells.len(), 2);
        assert_eq!(ex.rows[0].cells[0].text, "Rated Voltage");
    }

    #[test]
    fn non_table_elements_carry_attrs_and_options() {
        let p = page(
            r#"<form><select name="tc" data-filter="tc" data-label="Dielectric">
                 <option value="">Any</option><option value="x7r">X7R</option>
               </select></form>"#,
        );
        let ex = p.extract("[data-filter]").unwrap();
        assert_eq!(ex.rows.len(), 1);
        let row = &ex.rows[0];
        assert_eq!(row.cells[0].tag, "select");
        assert_eq!(row.cells[0].attr("data-label"), Some("Dielectric"));
        assert_eq!(row.cells.len(), 3);
        assert_eq!(row.cells[2].attr("value"), Some("x7r"));
        assert_eq!(row.cells[2].text, "X7R");
    }

    #[test]
    fn get_form_submission_merges_defaults_and_fills() {
        let p = page(
            r#"<form id="search" action="/search" method="get">
                 <input type="hidden" name="lang" value="en">
                 <input type="text" name="q">
                 <input type="checkbox" name="stock" value="1">
                 <button type="submit">Go</button>
               </form>"#,
        );
        let pending = vec![("q".to_string(), "GRM0115".to_string())];
        let target = p.click_target("form#search button[type='submit']", &pending).unwrap();
        match target {
            ClickTarget::Submit(req) => {
                assert_eq!(req.method, FormMethod::Get);
                assert_eq!(req.url.path(), "/search");
                let pairs: Vec<(String, String)> = req.url.query_pairs().into_owned().collect();
                assert_eq!(
                    pairs,
                    vec![
                        ("lang".to_string(), "en".to_string()),
                        ("q".to_string(), "GRM0115".to_string())
                    ]
                );
            }
            other => panic!("expected submit, got {other:?}"),
        }
    }

    #[test]
    fn post_form_keeps_pairs_in_body() {
        let p = page(
            r#"<form id="xref" action="/xref" method="POST">
                 <input name="competitor"><input type="submit" name="go" value="Find">
               </form>"#,
        );
        let pending = vec![("competitor".to_string(), "ABC-1".to_string())];
        let ClickTarget::Submit(req) = p.click_target("form#xref input[type='submit']", &pending).unwrap() else {
            panic!("expected submit");
        };
        assert_eq!(req.method, FormMethod::Post);
        assert!(req.form.contains(&("competitor".to_string(), "ABC-1".to_string())));
        assert!(req.form.contains(&("go".to_string(), "Find".to_string())));
    }

    #[test]
    fn clicking_a_link_follows_it() {
        let p = page(r#"<a class="next-page" href="?page=2">Next</a>"#);
        let target = p.click_target("a.next-page", &[]).unwrap();
        assert_eq!(
            target,
            ClickTarget::Follow(Url::parse("https://vendor.test/products/caps?page=2").unwrap())
        );
    }

    #[test]
    fn control_name_requires_named_control() {
        let p = page(r#"<form><input id="q" name="query"><div id="d"></div></form>"#);
        assert_eq!(p.control_name("#q").unwrap(), "query");
        assert!(matches!(p.control_name("#d"), Err(NavigationError::NotFound { .. })));
        assert!(matches!(p.control_name("#missing"), Err(NavigationError::NotFound { .. })));
    }

    #[test]
    fn invalid_selector_is_reported() {
        let p = page("<p>hi</p>");
        assert!(matches!(p.extract("[[["), Err(NavigationError::InvalidSelector(_))));
    }

    #[test]
    fn block_marker_checks_title_and_headings_only() {
        let blocked = page("<title>Access Denied</title><h1>Please verify</h1>");
        let markers = vec!["captcha".to_string(), "access denied".to_string()];
        assert_eq!(blocked.block_marker(&markers).as_deref(), Some("access denied"));

        let normal = page("<title>Products</title><p>Solve our captcha to contact sales</p>");
        assert!(normal.block_marker(&markers).is_none());
    }
}
