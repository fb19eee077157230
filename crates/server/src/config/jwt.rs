use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct JwtConfig {
    /// HMAC secret used to sign and verify tokens.
    pub secret: String,

    /// Token lifetime in seconds.
    #[serde(default = "default_lifetime")]
    pub lifetime: u64,
}

fn default_lifetime() -> u64 {
    86_400
}
