//! Integration tests for the Gitea backend against a mock HTTP server.
//!
//! These tests verify:
//! - Write request shapes for new and existing entries
//! - Error surface for failed requests
//! - Auth headers, rate-limit backoff and pagination in the provider client
//! - Cancellation and timeouts

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use contentforge::auth::{Anonymous, AuthError, ChannelTokenProvider, StaticToken};
use contentforge::core::cancel::CancelToken;
use contentforge::core::session::{RetryPolicy, Session};
use contentforge::core::types::{DataFile, Repository};
use contentforge::forge::gitea::GiteaBackend;
use contentforge::forge::transport::RequestOptions;
use contentforge::forge::{Backend, ForgeError, MergeMethod, PrState};
use contentforge::persist::{PersistEngine, PersistError, PersistOptions, WriteStrategy};

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    }
}

fn session() -> Session {
    Session::new(Arc::new(StaticToken::new("xyz"))).with_retry(fast_retry(3))
}

fn backend(server: &MockServer, session: Session) -> GiteaBackend {
    GiteaBackend::new(
        Repository::new("owner", "repo", "master"),
        format!("{}/api/v1", server.uri()),
        session,
    )
}

fn file_response(commit_sha: &str, blob_sha: &str) -> Value {
    json!({
        "content": { "sha": blob_sha },
        "commit": { "sha": commit_sha, "message": "commitMessage", "parents": [{ "sha": "parent" }] }
    })
}

mod persist {
    use super::*;

    #[tokio::test]
    async fn new_entry_is_one_create_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/repos/owner/repo/contents/content/posts/new-post.md"))
            .and(body_json(json!({
                "branch": "master",
                "content": BASE64.encode("content"),
                "message": "commitMessage",
                "signoff": false,
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(file_response("new-head", "blob")))
            .expect(1)
            .mount(&server)
            .await;

        let engine = PersistEngine::new(Arc::new(backend(&server, session())));
        let result = engine
            .persist_files(
                &[DataFile::new("content/posts/new-post.md", "new-post", "content")],
                &[],
                PersistOptions::new("commitMessage").new_entry(true),
            )
            .await
            .unwrap();

        assert_eq!(result.strategy, WriteStrategy::Sequential);
        assert_eq!(result.head("master"), Some("new-head"));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn existing_entry_lists_then_updates_with_sha() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/api/v1/repos/owner/repo/git/trees/master:content(%2F|/)posts$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sha": "tree-sha",
                "truncated": false,
                "tree": [
                    { "path": "update-post.md", "type": "blob", "sha": "old-sha", "size": 7 },
                    { "path": "drafts", "type": "tree", "sha": "dir-sha" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/repos/owner/repo/contents/content/posts/update-post.md"))
            .and(body_json(json!({
                "branch": "master",
                "content": BASE64.encode("content"),
                "message": "commitMessage",
                "signoff": false,
                "sha": "old-sha",
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(file_response("updated-sha", "new-blob")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let engine = PersistEngine::new(Arc::new(backend(&server, session())));
        let result = engine
            .persist_files(
                &[DataFile::new("content/posts/update-post.md", "update-post", "content")],
                &[],
                PersistOptions::new("commitMessage"),
            )
            .await
            .unwrap();

        assert_eq!(result.head("master"), Some("updated-sha"));
        assert_eq!(result.files[0].sha.as_deref(), Some("new-blob"));

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method.as_str(), "GET");
        assert_eq!(requests[1].method.as_str(), "PUT");
    }

    #[tokio::test]
    async fn rejected_sha_is_a_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/api/v1/repos/owner/repo/git/trees/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tree": [{ "path": "a.md", "type": "blob", "sha": "old-sha" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(json!({ "message": "sha does not match" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let engine = PersistEngine::new(Arc::new(backend(&server, session())));
        let err = engine
            .persist_files(
                &[DataFile::new("content/a.md", "a", "x")],
                &[],
                PersistOptions::new("m"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::Forge(ForgeError::Conflict(_))));
    }

    #[tokio::test]
    async fn unprocessable_sha_is_a_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_json(
                json!({ "message": "repository file already exists [path: content/a.md]" }),
            ))
            .mount(&server)
            .await;

        let err = backend(&server, session())
            .write_file(contentforge::forge::FileWrite::new("master", "content/a.md", "x", "m"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn stale_base_sha_writes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tree": [{ "path": "a.md", "type": "blob", "sha": "their-sha" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let engine = PersistEngine::new(Arc::new(backend(&server, session())));
        let err = engine
            .persist_files(
                &[DataFile::new("content/a.md", "a", "x").with_base_sha("my-sha")],
                &[],
                PersistOptions::new("m"),
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn partial_failure_names_committed_files() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/repos/owner/repo/contents/content/one.md"))
            .respond_with(ResponseTemplate::new(201).set_body_json(file_response("h1", "b1")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/repos/owner/repo/contents/content/two.md"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let engine = PersistEngine::new(Arc::new(backend(&server, session())));
        let err = engine
            .persist_files(
                &[
                    DataFile::new("content/one.md", "one", "1"),
                    DataFile::new("content/two.md", "two", "2"),
                ],
                &[],
                PersistOptions::new("m").new_entry(true),
            )
            .await
            .unwrap_err();

        match err {
            PersistError::Partial {
                strategy,
                committed,
                source,
            } => {
                assert_eq!(strategy, WriteStrategy::Sequential);
                assert_eq!(committed.len(), 1);
                assert_eq!(committed[0].path, "content/one.md");
                assert_eq!(source.status(), Some(500));
            }
            other => panic!("expected partial failure, got {:?}", other),
        }
    }
}

mod tree {
    use super::*;

    #[tokio::test]
    async fn workflow_branch_is_one_ref_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/api/v1/repos/owner/repo/git/trees/cms%2Fposts%2Fhello:content$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sha": "tree-sha",
                "truncated": false,
                "tree": [{ "path": "hello.md", "type": "blob", "sha": "hello-sha", "size": 5 }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let entries = backend(&server, session())
            .list_tree("cms/posts/hello", "content", 1)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "content/hello.md");
        assert_eq!(entries[0].sha, "hello-sha");
    }
}

mod errors {
    use super::*;

    #[tokio::test]
    async fn not_found_surfaces_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "some error" })))
            .mount(&server)
            .await;

        let backend = backend(&server, session());
        let err = backend
            .client()
            .request::<Value>("repos/owner/repo/contents/x.md", RequestOptions::get())
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        let surfaced = serde_json::to_value(err.api_error().unwrap()).unwrap();
        assert_eq!(
            surfaced,
            json!({ "name": "API_ERROR", "status": 404, "message": "some error", "api": "gitea" })
        );
    }

    #[tokio::test]
    async fn missing_directory_lists_as_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "not found" })))
            .expect(1)
            .mount(&server)
            .await;

        let mut resolver = contentforge::tree::TreeResolver::new(Arc::new(backend(&server, session())));
        assert!(resolver.list_files("master", "nope", 1).await.unwrap().is_empty());
        assert!(resolver.list_files("master", "nope", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unauthorized_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "token is required" })))
            .mount(&server)
            .await;

        let err = backend(&server, session()).read_file("master", "a.md").await.unwrap_err();
        assert!(matches!(err, ForgeError::Auth(_)));
    }
}

mod transport {
    use super::*;

    #[tokio::test]
    async fn sends_token_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/repos/owner/repo/raw/content/a.md"))
            .and(query_param("ref", "master"))
            .and(header("authorization", "token xyz"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .expect(1)
            .mount(&server)
            .await;

        let content = backend(&server, session()).read_file("master", "content/a.md").await.unwrap();
        assert_eq!(content, b"hello");
    }

    #[tokio::test]
    async fn anonymous_sends_no_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        backend(&server, Session::new(Arc::new(Anonymous)))
            .read_file("master", "a.md")
            .await
            .unwrap();
        let requests = server.received_requests().await.unwrap();
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn token_is_resolved_per_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let (provider, mut requests) = ChannelTokenProvider::new(4);
        let tokens = tokio::spawn(async move {
            let mut n = 0;
            while let Some(request) = requests.next().await {
                n += 1;
                request.respond(Ok(format!("t{}", n)));
            }
        });

        let backend = backend(&server, Session::new(Arc::new(provider)));
        backend.read_file("master", "a.md").await.unwrap();
        backend.read_file("master", "b.md").await.unwrap();

        let received = server.received_requests().await.unwrap();
        assert_eq!(received[0].headers.get("authorization").unwrap(), "token t1");
        assert_eq!(received[1].headers.get("authorization").unwrap(), "token t2");
        drop(backend);
        tokens.await.unwrap();
    }

    #[tokio::test]
    async fn failed_credentials_send_nothing() {
        let server = MockServer::start().await;
        let (provider, mut requests) = ChannelTokenProvider::new(1);
        tokio::spawn(async move {
            if let Some(request) = requests.next().await {
                request.respond(Err(AuthError::Denied("window closed".into())));
            }
        });

        let err = backend(&server, Session::new(Arc::new(provider)))
            .read_file("master", "a.md")
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::Credentials(AuthError::Denied(_))));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("finally"))
            .mount(&server)
            .await;

        let content = backend(&server, session()).read_file("master", "a.md").await.unwrap();
        assert_eq!(content, b"finally");
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rate_limit_gives_up_after_bound() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = backend(&server, session()).read_file("master", "a.md").await.unwrap_err();
        match err {
            ForgeError::RateLimited { api, attempts } => {
                assert_eq!(api, "gitea");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn server_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let err = backend(&server, session()).read_file("master", "a.md").await.unwrap_err();
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn follows_link_pagination() {
        let server = MockServer::start().await;
        let next = format!(
            "<{}/api/v1/repos/owner/repo/pulls?state=all&limit=50&page=2>; rel=\"next\"",
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/api/v1/repos/owner/repo/pulls"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([pr_json(7, "cms/posts/a", "open")])))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/repos/owner/repo/pulls"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("link", next.as_str())
                    .set_body_json(json!([
                        pr_json(3, "cms/posts/a", "closed"),
                        pr_json(5, "cms/posts/b", "open")
                    ])),
            )
            .mount(&server)
            .await;

        let prs: Vec<Value> = backend(&server, session())
            .client()
            .request_all(
                "repos/owner/repo/pulls",
                RequestOptions::get().param("state", "all").param("limit", 50),
            )
            .await
            .unwrap();
        let numbers: Vec<u64> = prs.iter().map(|pr| pr["number"].as_u64().unwrap()).collect();
        assert_eq!(numbers, vec![3, 5, 7]);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_session_sends_nothing() {
        let server = MockServer::start().await;
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = backend(&server, session().with_cancel(cancel))
            .read_file("master", "a.md")
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::Cancelled));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let err = backend(&server, session().with_timeout(Duration::from_millis(50)))
            .read_file("master", "a.md")
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::Timeout(_)));
    }
}

mod pull_requests {
    use super::*;

    #[tokio::test]
    async fn mark_ready_creates_missing_label() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/repos/owner/repo/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1, "name": "bug" }])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/repos/owner/repo/labels"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({ "id": 9, "name": "cms/pending_publish" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/repos/owner/repo/issues/4/labels"))
            .and(body_json(json!({ "labels": [9] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        backend(&server, session()).mark_ready(4).await.unwrap();
    }

    #[tokio::test]
    async fn pull_request_is_looked_up_by_base_and_head() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/repos/owner/repo/pulls/master/cms/posts/a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pr_json(7, "cms/posts/a", "open")))
            .expect(1)
            .mount(&server)
            .await;

        let pr = backend(&server, session())
            .find_pr_by_head("cms/posts/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pr.number, 7);
        assert_eq!(pr.state, PrState::Open);
        assert_eq!(pr.head_sha.as_deref(), Some("head-7"));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn branch_without_pull_request_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/repos/owner/repo/pulls/master/cms/posts/b"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "pull request does not exist" })))
            .expect(1)
            .mount(&server)
            .await;

        let pr = backend(&server, session()).find_pr_by_head("cms/posts/b").await.unwrap();
        assert!(pr.is_none());
    }

    #[tokio::test]
    async fn unmergeable_is_a_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/repos/owner/repo/pulls/4/merge"))
            .and(body_json(json!({ "Do": "merge" })))
            .respond_with(ResponseTemplate::new(405).set_body_json(json!({ "message": "not mergeable" })))
            .mount(&server)
            .await;

        let err = backend(&server, session())
            .merge_pr(4, MergeMethod::Merge)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }
}

fn pr_json(number: u64, head: &str, state: &str) -> Value {
    json!({
        "number": number,
        "html_url": format!("https://gitea.example.com/owner/repo/pulls/{}", number),
        "state": state,
        "merged": false,
        "title": "Update",
        "head": { "ref": head, "sha": format!("head-{}", number) },
        "base": { "ref": "master" },
        "labels": [],
    })
}
