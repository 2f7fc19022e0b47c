pub mod admin;
pub mod analytics;
pub mod auth;
pub mod composer;
pub mod domain;
pub mod repository;
pub mod storage;
pub mod time;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub supabase_url: Option<String>,
        pub supabase_anon_key: Option<String>,
        pub supabase_service_role_key: Option<String>,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: non_empty_var("DATABASE_URL"),
                supabase_url: non_empty_var("SUPABASE_URL"),
                supabase_anon_key: non_empty_var("SUPABASE_ANON_KEY"),
                supabase_service_role_key: non_empty_var("SUPABASE_SERVICE_ROLE_KEY"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_supabase_url(&self) -> anyhow::Result<&str> {
            self.supabase_url
                .as_deref()
                .context("SUPABASE_URL is required")
        }

        /// Key sent as `apikey` on every REST call. The anon key is preferred so that
        /// row-level policies apply to the forwarded user token.
        pub fn require_supabase_api_key(&self) -> anyhow::Result<&str> {
            self.supabase_anon_key
                .as_deref()
                .or(self.supabase_service_role_key.as_deref())
                .context("SUPABASE_ANON_KEY or SUPABASE_SERVICE_ROLE_KEY is required")
        }

        pub fn require_supabase_service_role_key(&self) -> anyhow::Result<&str> {
            self.supabase_service_role_key
                .as_deref()
                .context("SUPABASE_SERVICE_ROLE_KEY is required")
        }
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}
