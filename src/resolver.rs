//! Archive URL guessing.
//!
//! The archive names each file after the exact broadcast start time, which is
//! not published anywhere. Only the broadcast date is known, so candidates are
//! generated backwards from midnight after the broadcast and probed in order
//! until one exists.
use std::future::Future;
use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use tracing::{debug, info};

use crate::models::BroadcastDate;

/// Fixed tail of every archive file name (bitrate and profile).
const FILE_SUFFIX: &str = "368k_p16v17.webm";

// ── Window ────────────────────────────────────────────────────────────────────

/// Lookback window: `steps` candidates, `step_minutes` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    pub steps: u32,
    pub step_minutes: i64,
}

impl SearchWindow {
    /// Four hours in quarter-hour steps.
    pub const DEFAULT: SearchWindow = SearchWindow {
        steps: 16,
        step_minutes: 15,
    };
}

impl Default for SearchWindow {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Candidate start times, most recent first: `date + 1 day - k * step` for
/// `k` in `0..steps`. The window ends early at the first offset outside
/// chrono's range.
pub fn candidate_timestamps(date: BroadcastDate, window: SearchWindow) -> Vec<NaiveDateTime> {
    let Some(anchor) = date
        .date()
        .and_time(NaiveTime::MIN)
        .checked_add_signed(TimeDelta::days(1))
    else {
        return Vec::new();
    };
    (0..window.steps)
        .map_while(|k| {
            let back = window
                .step_minutes
                .checked_mul(i64::from(k))
                .and_then(TimeDelta::try_minutes)?;
            anchor.checked_sub_signed(back)
        })
        .collect()
}

// ── URL layout ────────────────────────────────────────────────────────────────

/// Static parts of an archive URL.
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    /// Scheme and host, e.g. `https://nrodlzdf-a.akamaihd.net`.
    pub base: String,
    pub service: String,
    pub show_code: String,
}

impl ArchiveLayout {
    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self {
            base: config.archive_base.trim_end_matches('/').to_string(),
            service: config.archive_service.clone(),
            show_code: config.archive_show_code.clone(),
        }
    }

    /// `<base>/none/<service>/YY/MM/YYMMDD_HHMM_sendung_<show>/1/YYMMDD_HHMM_sendung_<show>_368k_p16v17.webm`
    pub fn candidate_url(&self, timestamp: NaiveDateTime) -> String {
        let month_dir = timestamp.format("%y/%m");
        let stamp = timestamp.format("%y%m%d_%H%M");
        format!(
            "{base}/none/{service}/{month_dir}/{stamp}_sendung_{show}/1/{stamp}_sendung_{show}_{FILE_SUFFIX}",
            base = self.base,
            service = self.service,
            show = self.show_code,
        )
    }

    pub fn candidate_urls(&self, date: BroadcastDate, window: SearchWindow) -> Vec<String> {
        candidate_timestamps(date, window)
            .into_iter()
            .map(|ts| self.candidate_url(ts))
            .collect()
    }
}

// ── Probing ───────────────────────────────────────────────────────────────────

/// Existence check for a candidate URL. Any failure counts as "does not exist".
pub trait Probe {
    fn exists(&self, url: &str) -> impl Future<Output = bool> + Send;
}

/// Probes with a streamed GET whose body is never read; the archive does not
/// answer HEAD reliably.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(proxy: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: crate::http::client(proxy, timeout)?,
        })
    }
}

impl Probe for HttpProbe {
    fn exists(&self, url: &str) -> impl Future<Output = bool> + Send {
        let request = self.client.get(url).send();
        async move {
            match request.await {
                Ok(resp) => resp.status() == reqwest::StatusCode::OK,
                Err(e) => {
                    debug!("probe failed: {e}");
                    false
                }
            }
        }
    }
}

/// Probe the window strictly in order and return the first URL that exists.
/// Later candidates are never looked at once one succeeds.
pub async fn resolve<P: Probe>(
    date: BroadcastDate,
    probe: &P,
    layout: &ArchiveLayout,
    window: SearchWindow,
) -> Option<String> {
    for (step, url) in layout.candidate_urls(date, window).into_iter().enumerate() {
        debug!("Probing {url}");
        if probe.exists(&url).await {
            info!("Found archive file for {date} at window step {step}");
            return Some(url);
        }
    }
    info!(
        "No archive file for {date} within {} candidates",
        window.steps
    );
    None
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use chrono::NaiveDate;

    use super::*;

    /// Answers from a fixed set and remembers every URL it was asked about.
    struct Oracle {
        existing: HashSet<String>,
        asked: Mutex<Vec<String>>,
    }

    impl Oracle {
        fn new(existing: impl IntoIterator<Item = String>) -> Self {
            Self {
                existing: existing.into_iter().collect(),
                asked: Mutex::new(Vec::new()),
            }
        }

        fn asked(&self) -> Vec<String> {
            self.asked.lock().unwrap().clone()
        }
    }

    impl Probe for Oracle {
        fn exists(&self, url: &str) -> impl Future<Output = bool> + Send {
            self.asked.lock().unwrap().push(url.to_string());
            let hit = self.existing.contains(url);
            async move { hit }
        }
    }

    fn layout() -> ArchiveLayout {
        ArchiveLayout {
            base: "https://nrodlzdf-a.akamaihd.net".into(),
            service: "zdf".into(),
            show_code: "mla".into(),
        }
    }

    fn date(d: u32, m: u32, y: i32) -> BroadcastDate {
        BroadcastDate::new(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn window_steps_back_from_the_following_midnight() {
        let stamps = candidate_timestamps(date(14, 3, 2024), SearchWindow::DEFAULT);
        assert_eq!(stamps.len(), 16);
        let fmt: Vec<String> = stamps
            .iter()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .collect();
        assert_eq!(fmt[0], "2024-03-15 00:00");
        assert_eq!(fmt[1], "2024-03-14 23:45");
        assert_eq!(fmt[15], "2024-03-14 20:15");
        assert!(stamps.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn window_crosses_month_and_year_boundaries() {
        let stamps = candidate_timestamps(date(31, 12, 2023), SearchWindow::DEFAULT);
        assert_eq!(
            layout().candidate_url(stamps[0]),
            "https://nrodlzdf-a.akamaihd.net/none/zdf/24/01/240101_0000_sendung_mla/1/240101_0000_sendung_mla_368k_p16v17.webm"
        );
        assert_eq!(
            layout().candidate_url(stamps[3]),
            "https://nrodlzdf-a.akamaihd.net/none/zdf/23/12/231231_2315_sendung_mla/1/231231_2315_sendung_mla_368k_p16v17.webm"
        );
    }

    #[test]
    fn window_size_is_a_single_tunable() {
        let wide = SearchWindow {
            steps: 24,
            step_minutes: 10,
        };
        let stamps = candidate_timestamps(date(14, 3, 2024), wide);
        assert_eq!(stamps.len(), 24);
        assert_eq!(
            stamps[23].format("%H:%M").to_string(),
            "20:10",
            "24 steps of 10 minutes end 230 minutes before midnight"
        );
    }

    #[test]
    fn oversized_steps_stop_the_window_instead_of_panicking() {
        let huge = SearchWindow {
            steps: 16,
            step_minutes: i64::MAX / 2,
        };
        let stamps = candidate_timestamps(date(14, 3, 2024), huge);
        assert_eq!(stamps.len(), 1);
        assert_eq!(stamps[0].format("%Y-%m-%d %H:%M").to_string(), "2024-03-15 00:00");
    }

    #[tokio::test]
    async fn first_match_wins_even_if_later_candidates_exist() {
        let urls = layout().candidate_urls(date(14, 3, 2024), SearchWindow::DEFAULT);
        let oracle = Oracle::new([urls[5].clone(), urls[9].clone()]);

        let found = resolve(date(14, 3, 2024), &oracle, &layout(), SearchWindow::DEFAULT).await;

        assert_eq!(found.as_deref(), Some(urls[5].as_str()));
        assert_eq!(oracle.asked(), urls[..6].to_vec());
    }

    #[tokio::test]
    async fn exhausted_window_is_not_found() {
        let oracle = Oracle::new([]);
        let found = resolve(date(14, 3, 2024), &oracle, &layout(), SearchWindow::DEFAULT).await;

        assert!(found.is_none());
        assert_eq!(
            oracle.asked(),
            layout().candidate_urls(date(14, 3, 2024), SearchWindow::DEFAULT)
        );
    }

    #[tokio::test]
    async fn resolution_is_deterministic() {
        let urls = layout().candidate_urls(date(2, 2, 2024), SearchWindow::DEFAULT);
        let oracle = Oracle::new([urls[12].clone()]);
        let a = resolve(date(2, 2, 2024), &oracle, &layout(), SearchWindow::DEFAULT).await;
        let b = resolve(date(2, 2, 2024), &oracle, &layout(), SearchWindow::DEFAULT).await;
        assert_eq!(a, b);
        assert_eq!(a.as_deref(), Some(urls[12].as_str()));
    }

    #[tokio::test]
    async fn http_probe_treats_non_200_and_unreachable_as_absent() {
        use axum::{Router, http::StatusCode, routing::get};

        let app = Router::new()
            .route("/ok", get(|| async { "webm" }))
            .route("/gone", get(|| async { StatusCode::NOT_FOUND }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let probe = HttpProbe::new(None, Duration::from_secs(2)).unwrap();
        assert!(probe.exists(&format!("http://{addr}/ok")).await);
        assert!(!probe.exists(&format!("http://{addr}/gone")).await);
        assert!(!probe.exists("http://127.0.0.1:9/closed").await);
    }
}
