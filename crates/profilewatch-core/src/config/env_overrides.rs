//! Environment variable overrides applied after the TOML file is loaded.
//!
//! Every recognized option from the external interface can be overridden
//! by setting the matching environment variable; this layer always wins.

use super::Config;

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_u16(name: &str) -> Option<u16> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_bool(name: &str) -> Option<bool> {
    match std::env::var(name).ok()?.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

pub(super) fn apply(config: &mut Config) {
    if let Some(v) = env_u64("MIN_TIME_BETWEEN_JOBS_MS") {
        config.queue.min_time_between_jobs_ms = v;
    }
    if let Some(v) = env_u64("MAX_BACKOFF_MS") {
        config.queue.max_backoff_ms = v;
    }
    if let Ok(v) = std::env::var("DAILY_CRON_SCHEDULE") {
        config.schedule.daily_cron = v;
    }
    if let Ok(v) = std::env::var("REFRESH_CRON_SCHEDULE") {
        config.schedule.refresh_cron = v;
    }
    if let Ok(v) = std::env::var("TZ") {
        config.schedule.tz = v;
    }
    if let Ok(v) = std::env::var("INSTAGRAM_COOKIES") {
        config.cookies.instagram_cookies = Some(v);
    }
    if let Ok(v) = std::env::var("INSTAGRAM_COOKIES_JSON") {
        config.cookies.instagram_cookies_json = Some(v);
    }
    if let Some(v) = env_bool("DOWNLOAD_REELS_TO_R2") {
        config.pipeline.download_reels_to_r2 = v;
    }
    if let Some(v) = env_u16("PORT") {
        config.server.port = v;
    }
    if let Ok(v) = std::env::var("SCRAPER_BASE_URL") {
        config.scraper.base_url = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn overrides_spacing_and_port() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("MIN_TIME_BETWEEN_JOBS_MS", "60000");
        std::env::set_var("PORT", "9090");

        let mut config = Config::default();
        apply(&mut config);

        assert_eq!(config.queue.min_time_between_jobs_ms, 60_000);
        assert_eq!(config.server.port, 9090);

        std::env::remove_var("MIN_TIME_BETWEEN_JOBS_MS");
        std::env::remove_var("PORT");
    }

    #[test]
    fn invalid_numeric_override_is_ignored() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("PORT", "not-a-number");

        let mut config = Config::default();
        let before = config.server.port;
        apply(&mut config);

        assert_eq!(config.server.port, before);
        std::env::remove_var("PORT");
    }
}
