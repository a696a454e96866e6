use pkgscout_http::{ClientContext, PkgScoutError, RegistryClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let names: Vec<String> = std::env::args().skip(1).collect();
    let names = if names.is_empty() {
        vec!["left-pad".to_owned(), "@types/node".to_owned(), "react".to_owned()]
    } else {
        names
    };

    let context = ClientContext::new();
    let _watch = context.subscribe(|snapshot: &pkgscout_http::OfflineSnapshot| {
        eprintln!("offline state changed: {snapshot:?}");
    });
    let registry = RegistryClient::from_env(&context);

    let results = registry.fetch_metadata(&names).await;
    for name in &names {
        match results.get(name.trim()) {
            Some(Ok(meta)) => println!(
                "{}: latest={:?} license={:?} versions={}",
                meta.name, meta.latest_version, meta.license, meta.version_count
            ),
            Some(Err(err @ PkgScoutError::RateLimited { .. })) => {
                eprintln!("{name}: {}", err.user_message());
            }
            Some(Err(err)) => eprintln!("{name}: {err} ({:?})", err.category()),
            None => {}
        }
    }

    Ok(())
}
