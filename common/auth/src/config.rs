/// Settings for verifying tokens minted by the platform auth service.
///
/// All producing services share one HS256 secret; issuer/audience pinning is
/// left to the gateway that mints the tokens.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub leeway_seconds: u32,
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            leeway_seconds: 0,
        }
    }

    pub fn with_leeway(mut self, seconds: u32) -> Self {
        self.leeway_seconds = seconds;
        self
    }
}
