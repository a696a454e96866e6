use pkgscout_http::{ClientContext, CompletionClient, CompletionRequest, RegistryClient};

fn live_enabled() -> bool {
    matches!(std::env::var("PKGSCOUT_LIVE").as_deref(), Ok("1") | Ok("true"))
}

#[tokio::test]
async fn live_registry_bulk_lookup() {
    if !live_enabled() {
        eprintln!("skipping live test: set PKGSCOUT_LIVE=1 to hit the real registry");
        return;
    }

    let context = ClientContext::new();
    let registry = RegistryClient::from_env(&context);

    let results = registry
        .fetch_metadata(["serde-json-does-not-exist-pkgscout", "left-pad", "@types/node"])
        .await;

    assert_eq!(results.len(), 3);
    let left_pad = results["left-pad"].as_ref().expect("left-pad must resolve");
    assert_eq!(left_pad.name, "left-pad");
    assert!(left_pad.latest_version.is_some());
    assert!(results["@types/node"].is_ok());
    assert!(results["serde-json-does-not-exist-pkgscout"].is_err());

    let before = context.cache().len();
    registry
        .package("left-pad")
        .await
        .expect("cached lookup must succeed");
    assert_eq!(context.cache().len(), before);
}

#[tokio::test]
async fn live_completion_roundtrip() {
    if !live_enabled() {
        eprintln!("skipping live test: set PKGSCOUT_LIVE=1 to call the completion endpoint");
        return;
    }

    let context = ClientContext::new();
    let ai = match CompletionClient::from_env(&context) {
        Ok(client) => client,
        Err(reason) => {
            eprintln!("skipping live test: {reason}");
            return;
        }
    };
    let model = std::env::var("PKGSCOUT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_owned());

    let completion = ai
        .complete(
            &CompletionRequest::new(model)
                .user("Reply with the single word: ok")
                .max_tokens(5),
            None,
            None,
        )
        .await
        .expect("completion must succeed");

    assert!(!completion.content.trim().is_empty());
}
