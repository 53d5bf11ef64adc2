//! The three environment variables the `ChatProvider` layer needs.
//!
//! The core forwards these untouched (spec §6): it never inspects or
//! validates them, it just hands `ProviderEnv` to whatever constructs the
//! `ChatProvider`. Call [`load_and_apply`](crate::load_and_apply) first so
//! `.env`/XDG values are visible to `std::env::var`.

/// Resolved provider configuration read from the process environment.
#[derive(Clone, Debug, Default)]
pub struct ProviderEnv {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

/// Reads `JIMI_API_KEY`, `JIMI_BASE_URL`, and `JIMI_MODEL` from the process
/// environment. Missing variables become `None`; this never fails.
pub fn load_provider_env() -> ProviderEnv {
    ProviderEnv {
        api_key: std::env::var("JIMI_API_KEY").ok(),
        base_url: std::env::var("JIMI_BASE_URL").ok(),
        model: std::env::var("JIMI_MODEL").ok(),
    }
}
