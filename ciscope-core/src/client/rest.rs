//! Paginated REST fetcher.

use reqwest::Method;
use serde_json::Value;

use super::{merge_json, resource_url, ErrorSummary, Fetched, HttpClient, RawResponse};
use crate::error::{IngestError, Result};

/// Page size requested from page-numbered endpoints.
pub const PER_PAGE: usize = 100;

/// Root shape of a page-numbered REST response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// `{"total_count": n, "<items>": [...]}`
    Object,
    /// `[{...}, {...}]`
    Array,
}

/// REST client rooted at a base URL.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: HttpClient,
    base_url: String,
}

impl RestClient {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Retrieve every page of a page-numbered resource (`page=N&per_page=100`).
    ///
    /// Object-shaped responses are merged whole and returned as an object; array-shaped
    /// responses are concatenated and returned as an array. The shape is fixed by the first
    /// page that has one; a later page with the other shape stops pagination.
    pub async fn fetch(&self, resource_path: &str) -> Result<Fetched> {
        let mut errors = ErrorSummary::new();
        let mut shape: Option<Shape> = None;
        let mut object = Value::Null;
        let mut items: Vec<Value> = Vec::new();
        let mut page = 1usize;

        loop {
            tracing::debug!("Issuing REST query {} page {}", resource_path, page);
            let mut url = resource_url(&self.base_url, resource_path)?;
            url.query_pairs_mut()
                .append_pair("page", &page.to_string())
                .append_pair("per_page", &PER_PAGE.to_string());

            let response = self.http.send(Method::GET, &url, None).await?;
            let body = parse_body(&response, resource_path, &mut errors)?;

            let page_shape = if body.get("total_count").is_some_and(Value::is_number) {
                Shape::Object
            } else if body.is_array() {
                Shape::Array
            } else {
                // error bodies and anything unexpected end pagination
                break;
            };

            match shape {
                Some(latched) if latched != page_shape => {
                    tracing::warn!(
                        "{} changed response shape on page {} ({:?} -> {:?}), keeping earlier pages",
                        resource_path,
                        page,
                        latched,
                        page_shape
                    );
                    break;
                }
                _ => shape = Some(page_shape),
            }

            match page_shape {
                Shape::Object => {
                    let total_count = body
                        .get("total_count")
                        .and_then(Value::as_f64)
                        .unwrap_or_default();
                    merge_json(&mut object, body);
                    if (page * PER_PAGE) as f64 > total_count {
                        break;
                    }
                }
                Shape::Array => {
                    let page_items = match body {
                        Value::Array(page_items) => page_items,
                        _ => Vec::new(),
                    };
                    let count = page_items.len();
                    items.extend(page_items);
                    if count < PER_PAGE {
                        break;
                    }
                }
            }

            page += 1;
        }

        errors.log(resource_path);

        let data = match shape {
            Some(Shape::Object) => object,
            Some(Shape::Array) => Value::Array(items),
            None => Value::Null,
        };
        Ok(Fetched { data, errors })
    }

    /// Retrieve a token-paginated resource, following `next_page_token` while `all` is set.
    pub async fn fetch_token_paged(&self, resource_path: &str, all: bool) -> Result<Fetched> {
        let mut errors = ErrorSummary::new();
        let mut data = Value::Null;
        let mut page_token: Option<String> = None;

        loop {
            tracing::debug!("Issuing REST query for path {}", resource_path);
            let mut url = resource_url(&self.base_url, resource_path)?;
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("page-token", token);
            }

            let response = self.http.send(Method::GET, &url, None).await?;
            let body = parse_body(&response, resource_path, &mut errors)?;
            let next_page_token = body
                .get("next_page_token")
                .and_then(Value::as_str)
                .filter(|token| !token.is_empty())
                .map(str::to_string);

            if response.status == 200 {
                merge_json(&mut data, body);
            }

            match next_page_token {
                Some(token) if all => page_token = Some(token),
                _ => break,
            }
        }

        errors.log(resource_path);
        Ok(Fetched { data, errors })
    }
}

/// Parse a response body, counting non-200 statuses.
///
/// A 200 body that is not JSON is fatal; error bodies that are not JSON parse as `null`.
fn parse_body(
    response: &RawResponse,
    resource_path: &str,
    errors: &mut ErrorSummary,
) -> Result<Value> {
    if response.status == 200 {
        return serde_json::from_str(&response.body).map_err(|source| IngestError::Parse {
            context: resource_path.to_string(),
            source,
        });
    }

    let body: Value = serde_json::from_str(&response.body).unwrap_or(Value::Null);
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    errors.record_status(response.status, message);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body_tracks_status() {
        let mut errors = ErrorSummary::new();
        let response = RawResponse {
            status: 404,
            body: r#"{"message": "Not Found"}"#.into(),
        };
        let body = parse_body(&response, "repos/acme/api/hooks", &mut errors).unwrap();
        assert_eq!(body["message"], "Not Found");
        assert_eq!(errors.count_for_status(404), 1);
    }

    #[test]
    fn test_parse_body_rejects_invalid_200() {
        let mut errors = ErrorSummary::new();
        let response = RawResponse {
            status: 200,
            body: "<html>".into(),
        };
        assert!(matches!(
            parse_body(&response, "orgs/acme/actions/secrets", &mut errors),
            Err(IngestError::Parse { .. })
        ));
    }
}
