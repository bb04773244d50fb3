use crate::api;
use crate::api::handlers::auth::{AuthConfig, JwtConfig};
use crate::cli::actions::Action;
use anyhow::Result;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            jwt_secret,
            frontend_url,
            expose_tokens,
        } => {
            let config = AuthConfig::new(frontend_url, JwtConfig::new(jwt_secret))
                .with_expose_tokens(expose_tokens);

            api::new(port, dsn, config).await?;
        }
    }

    Ok(())
}
