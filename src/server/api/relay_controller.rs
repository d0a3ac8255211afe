use axum::{
    Extension, Router,
    body::Body,
    extract::Query,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::TryStreamExt;
use std::collections::HashMap;
use tracing::{debug, error, info};

use crate::server::{
    error::{AppResult, Error},
    services::{relay_services::RelayServices, upstream_services::UpstreamRequest},
    utils::playlist_utils::{PlaylistRewriter, ResourceKind},
};

pub struct RelayController;

impl RelayController {
    pub fn app() -> Router {
        Router::new().route("/proxy", get(Self::relay_get).options(Self::relay_options))
    }

    async fn relay_get(
        Extension(services): Extension<RelayServices>,
        Query(mut params): Query<HashMap<String, String>>,
    ) -> AppResult<Response> {
        // a map never rejects, so repeated params still end up as json errors. empty url= is
        // as good as none
        let Some(target_url) = params.remove("url").filter(|u| !u.is_empty()) else {
            debug!("Relay request without url parameter");
            return Err(Error::MissingUrl);
        };

        info!("Relaying: {}", target_url);

        let request = UpstreamRequest::parse(&target_url)?;
        let upstream = services.upstream.fetch(&request).await?;

        let status = upstream.status();
        if !status.is_success() {
            // the body is usually a cdn error page, not worth reading
            error!("Upstream {} responded with {}", target_url, status);
            return Err(Error::Upstream(status));
        }

        let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();

        let mut response = match ResourceKind::classify(request.requested()) {
            ResourceKind::Playlist => {
                let body = Self::read_capped(upstream, services.config.max_playlist_bytes).await?;
                // stray latin-1 in titles is common, uri lines are ascii either way
                let text = String::from_utf8_lossy(&body);

                let rewritten =
                    PlaylistRewriter::new(request.requested(), &services.config.relay_prefix)
                        .rewrite(&text);
                debug!(
                    "Rewrote playlist {} ({} -> {} bytes)",
                    target_url,
                    text.len(),
                    rewritten.len()
                );

                Response::new(Body::from(rewritten))
            }
            ResourceKind::Passthrough => {
                let stream = upstream.bytes_stream().inspect_err(move |e| {
                    error!("Upstream body for {} failed mid-stream: {}", target_url, e);
                });

                Response::new(Body::from_stream(stream))
            }
        };

        if let Some(content_type) = content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }

        Ok(response)
    }

    async fn relay_options() -> impl IntoResponse {
        StatusCode::NO_CONTENT
    }

    /// buffers a playlist body, refusing it as soon as it's known to be over `limit`
    async fn read_capped(mut upstream: reqwest::Response, limit: usize) -> AppResult<Vec<u8>> {
        if let Some(declared) = upstream.content_length() {
            if declared > limit as u64 {
                error!("Playlist declares {} bytes, limit is {}", declared, limit);
                return Err(Error::PlaylistTooLarge(limit));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = upstream.chunk().await.map_err(|e| {
            error!("Failed to read playlist body: {}", e);
            Error::Fetch(e.to_string())
        })? {
            if body.len() + chunk.len() > limit {
                error!("Playlist grew past the {} byte limit while reading", limit);
                return Err(Error::PlaylistTooLarge(limit));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{body::to_bytes, http::Request};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::AppConfig,
        server::services::upstream_services::{DynUpstreamService, MockUpstreamServiceTrait},
    };

    fn upstream_response(status: u16, content_type: Option<&str>, body: &str) -> reqwest::Response {
        let mut builder = axum::http::Response::builder().status(status);
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        reqwest::Response::from(builder.body(body.to_string()).unwrap())
    }

    fn upstream_bytes(body: &[u8]) -> reqwest::Response {
        reqwest::Response::from(
            axum::http::Response::builder()
                .status(200)
                .body(body.to_vec())
                .unwrap(),
        )
    }

    // no content-length, the body only reveals its size while it's read
    fn upstream_chunked(chunks: Vec<&'static str>) -> reqwest::Response {
        let stream = futures::stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
        reqwest::Response::from(
            axum::http::Response::builder()
                .status(200)
                .body(reqwest::Body::wrap_stream(stream))
                .unwrap(),
        )
    }

    fn app_with(mock: MockUpstreamServiceTrait, config: AppConfig) -> Router {
        let services = RelayServices::with_upstream(
            Arc::new(config),
            Arc::new(mock) as DynUpstreamService,
        );
        RelayController::app().layer(Extension(services))
    }

    async fn call(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    fn encoded(url: &str) -> String {
        format!("/proxy?url={}", urlencoding::encode(url))
    }

    #[tokio::test]
    async fn missing_url_never_reaches_upstream() {
        let mut mock = MockUpstreamServiceTrait::new();
        mock.expect_fetch().times(0);

        let (status, _, body) = call(app_with(mock, AppConfig::default()), "/proxy").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, r#"{"error":"URL parameter required"}"#);
    }

    #[tokio::test]
    async fn empty_url_counts_as_missing() {
        let mut mock = MockUpstreamServiceTrait::new();
        mock.expect_fetch().times(0);

        let (status, _, _) = call(app_with(mock, AppConfig::default()), "/proxy?url=").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unparseable_url_is_a_server_error() {
        let mut mock = MockUpstreamServiceTrait::new();
        mock.expect_fetch().times(0);

        let (status, _, body) = call(app_with(mock, AppConfig::default()), "/proxy?url=test").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, r#"{"error":"relative URL without a base"}"#);
    }

    #[tokio::test]
    async fn upstream_status_is_propagated() {
        let mut mock = MockUpstreamServiceTrait::new();
        mock.expect_fetch()
            .times(1)
            .returning(|_| Ok(upstream_response(404, Some("text/html"), "<html>nope</html>")));

        let (status, _, body) = call(
            app_with(mock, AppConfig::default()),
            &encoded("https://example.com/live/index.m3u8"),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, r#"{"error":"Upstream error: 404"}"#);
    }

    #[tokio::test]
    async fn fetch_failures_become_server_errors() {
        let mut mock = MockUpstreamServiceTrait::new();
        mock.expect_fetch()
            .times(1)
            .returning(|_| Err(Error::Fetch("dns error".to_string())));

        let (status, _, body) = call(
            app_with(mock, AppConfig::default()),
            &encoded("https://nowhere.invalid/a.ts"),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, r#"{"error":"dns error"}"#);
    }

    #[tokio::test]
    async fn playlists_are_rewritten_against_the_requested_url() {
        let mut mock = MockUpstreamServiceTrait::new();
        mock.expect_fetch()
            .withf(|request| {
                request.requested() == "https://example.com/live/index.m3u8"
                    && request.referer() == "https://example.com/"
            })
            .times(1)
            .returning(|_| {
                Ok(upstream_response(
                    200,
                    Some("application/vnd.apple.mpegurl"),
                    "#EXTM3U\n#EXTINF:10.0,\nsegment1.ts\n#EXTINF:10.0,\nhttps://cdn.example.net/seg2.ts\n",
                ))
            });

        let (status, content_type, body) = call(
            app_with(mock, AppConfig::default()),
            &encoded("https://example.com/live/index.m3u8"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("application/vnd.apple.mpegurl"));
        assert_eq!(
            body,
            format!(
                "#EXTM3U\n#EXTINF:10.0,\n{}\n#EXTINF:10.0,\n{}\n",
                encoded("https://example.com/live/segment1.ts"),
                encoded("https://cdn.example.net/seg2.ts"),
            )
        );
    }

    #[tokio::test]
    async fn configured_prefix_is_used_for_rewritten_lines() {
        let mut mock = MockUpstreamServiceTrait::new();
        mock.expect_fetch()
            .returning(|_| Ok(upstream_response(200, None, "chunk.ts")));
        let config = AppConfig {
            relay_prefix: "https://relay.example.org/proxy".to_string(),
            ..Default::default()
        };

        let (status, content_type, body) =
            call(app_with(mock, config), &encoded("https://example.com/v/index.m3u8")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(content_type.is_none());
        assert_eq!(
            body,
            format!(
                "https://relay.example.org/proxy?url={}",
                urlencoding::encode("https://example.com/v/chunk.ts")
            )
        );
    }

    #[tokio::test]
    async fn oversized_playlists_are_refused() {
        let mut mock = MockUpstreamServiceTrait::new();
        mock.expect_fetch()
            .returning(|_| Ok(upstream_response(200, None, &"#EXTINF:1,\n".repeat(64))));
        let config = AppConfig {
            max_playlist_bytes: 32,
            ..Default::default()
        };

        let (status, _, body) =
            call(app_with(mock, config), &encoded("https://example.com/big.m3u8")).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body, r#"{"error":"Playlist exceeds 32 byte limit"}"#);
    }

    #[tokio::test]
    async fn segments_pass_through_untouched() {
        let mut mock = MockUpstreamServiceTrait::new();
        mock.expect_fetch()
            .returning(|_| Ok(upstream_response(200, Some("video/mp2t"), "segment1.ts\n#EXTINF")));

        let (status, content_type, body) = call(
            app_with(mock, AppConfig::default()),
            &encoded("https://example.com/live/segment1.ts"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("video/mp2t"));
        assert_eq!(body, "segment1.ts\n#EXTINF");
    }

    #[tokio::test]
    async fn options_answers_no_content() {
        let mock = MockUpstreamServiceTrait::new();
        let response = app_with(mock, AppConfig::default())
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/proxy")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn chunked_playlists_are_cut_off_once_past_the_limit() {
        let mut mock = MockUpstreamServiceTrait::new();
        mock.expect_fetch().returning(|_| {
            Ok(upstream_chunked(vec![
                "#EXTM3U\n#EXTINF:10.0,\n",
                "segment1.ts\n#EXTINF:10.0,\n",
                "segment2.ts\n#EXTINF:10.0,\n",
                "segment3.ts\n",
            ]))
        });
        let config = AppConfig {
            max_playlist_bytes: 40,
            ..Default::default()
        };

        let (status, _, body) =
            call(app_with(mock, config), &encoded("https://example.com/live/index.m3u8")).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body, r#"{"error":"Playlist exceeds 40 byte limit"}"#);
    }

    #[tokio::test]
    async fn chunked_playlists_under_the_limit_are_rewritten() {
        let mut mock = MockUpstreamServiceTrait::new();
        mock.expect_fetch()
            .returning(|_| Ok(upstream_chunked(vec!["#EXTM3U\n", "#EXTINF:4,\n", "seg.ts"])));

        let (status, _, body) = call(
            app_with(mock, AppConfig::default()),
            &encoded("https://example.com/live/index.m3u8"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            format!(
                "#EXTM3U\n#EXTINF:4,\n{}",
                encoded("https://example.com/live/seg.ts")
            )
        );
    }

    #[tokio::test]
    async fn latin1_titles_do_not_break_the_playlist() {
        let mut mock = MockUpstreamServiceTrait::new();
        mock.expect_fetch().returning(|_| {
            Ok(upstream_bytes(
                b"#EXTM3U\n#EXTINF:-1 tvg-name=\"T\xE9l\xE9\",Tele\n/seg.ts",
            ))
        });

        let (status, _, body) = call(
            app_with(mock, AppConfig::default()),
            &encoded("https://example.com/live/index.m3u8"),
        )
        .await;

        let lines: Vec<&str> = body.split('\n').collect();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "#EXTINF:-1 tvg-name=\"T\u{FFFD}l\u{FFFD}\",Tele");
        assert_eq!(lines[2], encoded("https://example.com/live//seg.ts"));
    }

    #[tokio::test]
    async fn bom_prefixed_header_stays_a_directive() {
        let mut mock = MockUpstreamServiceTrait::new();
        mock.expect_fetch().returning(|_| {
            Ok(upstream_bytes(
                "\u{FEFF}#EXTM3U\n#EXTINF:10.0,\nsegment1.ts".as_bytes(),
            ))
        });

        let (status, _, body) = call(
            app_with(mock, AppConfig::default()),
            &encoded("https://example.com/live/index.m3u8"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("#EXTM3U\n#EXTINF:10.0,\n"));
    }

    #[tokio::test]
    async fn repeated_url_params_still_answer_in_json() {
        let mut mock = MockUpstreamServiceTrait::new();
        mock.expect_fetch().times(0);

        let (status, content_type, body) = call(
            app_with(mock, AppConfig::default()),
            "/proxy?url=test&url=test",
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(content_type.as_deref(), Some("application/json"));
        assert_eq!(body, r#"{"error":"relative URL without a base"}"#);
    }
}
