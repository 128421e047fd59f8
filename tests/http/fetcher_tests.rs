use crmtap::http::fetcher::{fetch_pages, Page};
use crmtap::http::retry::ApiClient;
use crmtap::http::{Http, QueryParams};
use futures::TryStreamExt;
use serde_json::json;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::support::fast_retry;

const PRODUCTS: &str = "/crm/v3/objects/products";

#[tokio::test]
async fn test_cursor_pagination_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PRODUCTS))
        .and(query_param("limit", "2"))
        .and(query_param_is_missing("after"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"id": "1"}, {"id": "2"}],
            "paging": {"next": {"after": "2"}},
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(PRODUCTS))
        .and(query_param("limit", "2"))
        .and(query_param("after", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"id": "3"}],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = ApiClient::new(&server.uri(), &Http::new(), None, fast_retry()).unwrap();
    let mut params = QueryParams::new();
    params.insert("limit".into(), "2".into());

    let pages: Vec<Page> = fetch_pages(&api, PRODUCTS, params, "results")
        .try_collect()
        .await
        .unwrap();

    let ids: Vec<&str> = pages
        .iter()
        .flat_map(|p| p.results.iter().map(|r| r.id.as_str()))
        .collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert!(pages[1].next_cursor().is_none());
}

#[tokio::test]
async fn test_transient_failure_mid_pagination_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PRODUCTS))
        .and(query_param_is_missing("after"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"id": "1"}],
            "paging": {"next": {"after": "1"}},
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(PRODUCTS))
        .and(query_param("after", "1"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(PRODUCTS))
        .and(query_param("after", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"id": "2"}],
            "paging": {},
        })))
        .mount(&server)
        .await;

    let api = ApiClient::new(&server.uri(), &Http::new(), None, fast_retry()).unwrap();
    let pages: Vec<Page> = fetch_pages(&api, PRODUCTS, QueryParams::new(), "results")
        .try_collect()
        .await
        .unwrap();

    assert_eq!(pages.len(), 2);
    assert_eq!(pages[1].results[0].id, "2");
}
