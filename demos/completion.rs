use std::time::Duration;

use pkgscout_http::{ClientContext, CompletionClient, CompletionRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let context = ClientContext::new();
    let ai = CompletionClient::from_env(&context).map_err(anyhow::Error::msg)?;
    let model = std::env::var("PKGSCOUT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_owned());

    let request = CompletionRequest::new(model)
        .system("You assess open-source packages in one sentence.")
        .user("Is left-pad safe to depend on?")
        .max_tokens(80);

    match ai
        .complete(&request, Some("assess:left-pad"), Some(Duration::from_secs(600)))
        .await
    {
        Ok(completion) => {
            println!("{}", completion.content);
            if let Some(usage) = completion.usage {
                println!("tokens: {}", usage.total_tokens);
            }
        }
        Err(err) if err.is_fallback_eligible() => {
            println!("offline: {}; using heuristic score instead", err.user_message());
        }
        Err(err) => return Err(err.into()),
    }

    Ok(())
}
