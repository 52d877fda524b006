//! Synthetic event generator: writes one date-partitioned artifact per call.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{to_jsonl, DeviceType, Event, EventType};
use crate::objstore::{ArtifactKey, ObjectStore};

const EVENT_TYPES: [EventType; 3] = [EventType::View, EventType::AddToCart, EventType::Purchase];
/// Percent weights for `EVENT_TYPES`.
const EVENT_WEIGHTS: [u32; 3] = [78, 17, 5];
const DEVICES: [DeviceType; 3] = [DeviceType::Ios, DeviceType::Android, DeviceType::Web];
const PRICES: [f64; 7] = [9.99, 14.99, 19.99, 29.99, 49.99, 79.99, 99.99];
const COUNTRIES: [&str; 6] = ["US", "CA", "MX", "GB", "DE", "IN"];
const CAMPAIGNS: [Option<&str>; 4] = [None, Some("spring_1"), Some("spring_2"), Some("retarget_7")];
const MAX_USER_ID: i64 = 50_000;

/// Generator settings from the `[generator]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Events per artifact.
    pub count: usize,
    pub source_version: String,
    pub allow_campaign: bool,
    /// Fixed RNG seed for reproducible batches.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            count: 5000,
            source_version: "v1".to_string(),
            allow_campaign: false,
            seed: None,
        }
    }
}

/// One generator invocation: settings plus the partition date.
#[derive(Debug, Clone)]
pub struct GeneratorRequest {
    pub config: GeneratorConfig,
    pub date: NaiveDate,
}

/// Build a batch of `count` events timestamped within `date` (UTC).
pub fn generate_events<R: Rng>(
    rng: &mut R,
    date: NaiveDate,
    count: usize,
    source_version: &str,
    allow_campaign: bool,
) -> Result<Vec<Event>> {
    let weights = WeightedIndex::new(EVENT_WEIGHTS).context("invalid event weights")?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .context("invalid partition date")?
        .and_utc();

    let events = (0..count)
        .map(|_| {
            let event_type = EVENT_TYPES[weights.sample(rng)];
            let offset = Duration::hours(rng.gen_range(0..24))
                + Duration::minutes(rng.gen_range(0..60))
                + Duration::seconds(rng.gen_range(0..60));
            let price = (event_type == EventType::Purchase)
                .then(|| PRICES[rng.gen_range(0..PRICES.len())]);
            let campaign_id = if allow_campaign {
                CAMPAIGNS[rng.gen_range(0..CAMPAIGNS.len())].map(str::to_string)
            } else {
                None
            };

            Event {
                event_id: uuid::Builder::from_random_bytes(rng.gen()).into_uuid().to_string(),
                user_id: rng.gen_range(1..=MAX_USER_ID),
                event_type,
                event_ts: midnight + offset,
                device_type: DEVICES[rng.gen_range(0..DEVICES.len())],
                price,
                currency: "USD".to_string(),
                source_version: source_version.to_string(),
                geo_country: COUNTRIES[rng.gen_range(0..COUNTRIES.len())].to_string(),
                campaign_id,
            }
        })
        .collect();
    Ok(events)
}

/// Generate one batch and write it to `<prefix>/dt=<date>/events_<date>.jsonl`.
pub async fn generate_artifact(
    store: &dyn ObjectStore,
    prefix: &str,
    request: &GeneratorRequest,
) -> Result<ArtifactKey> {
    let cfg = &request.config;
    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let events = generate_events(
        &mut rng,
        request.date,
        cfg.count,
        &cfg.source_version,
        cfg.allow_campaign,
    )?;

    let key = ArtifactKey::for_date(prefix, request.date);
    let body = to_jsonl(&events)?;
    store
        .put(key.as_str(), body.into_bytes(), "application/json")
        .await
        .with_context(|| format!("failed to write {}", store.uri(key.as_str())))?;

    info!(key = %key, count = events.len(), "Wrote event artifact");
    println!("Wrote {} events to {}", events.len(), store.uri(key.as_str()));
    Ok(key)
}
