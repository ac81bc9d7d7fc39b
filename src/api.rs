//! Last.fm client: weekly charts, album tracklists and the account's
//! registration date.
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::LastFmSettings;
use crate::error::{ChartError, Result};
use crate::ingest::{AlbumInfoSource, ChartSource};
use crate::models::{AlbumInfo, AlbumKey, ChartKind, RawChartEntry, RawSnapshot, WeekRange};

// Error codes Last.fm documents as transient.
const RETRYABLE_ERRORS: [i64; 3] = [8, 16, 29];
const MAX_ATTEMPTS: u32 = 4;
const BACKOFF_BASE_MS: u64 = 500;

pub struct LastFmClient {
    http: reqwest::Client,
    settings: LastFmSettings,
}

impl LastFmClient {
    pub fn new(settings: LastFmSettings) -> Result<Self> {
        if settings.api_key.is_empty() {
            return Err(ChartError::Config("Last.fm api_key is not set".to_string()));
        }
        if settings.user.is_empty() {
            return Err(ChartError::Config("Last.fm user is not set".to_string()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            settings,
        })
    }

    pub fn user(&self) -> &str {
        &self.settings.user
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: &[(&str, String)]) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let body = self
                .http
                .get(&self.settings.base_url)
                .query(&[
                    ("method", method),
                    ("user", self.settings.user.as_str()),
                    ("api_key", self.settings.api_key.as_str()),
                    ("format", "json"),
                ])
                .query(params)
                .send()
                .await?
                .text()
                .await?;

            match decode::<T>(&body)? {
                Envelope::Ok(value) => return Ok(value),
                Envelope::Error { error, message } => {
                    if RETRYABLE_ERRORS.contains(&error) && attempt < MAX_ATTEMPTS {
                        let wait_ms = BACKOFF_BASE_MS << (attempt - 1);
                        tracing::warn!(method, code = error, wait_ms, "Last.fm throttled, backing off");
                        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                        continue;
                    }
                    return Err(ChartError::Provider { code: error, message });
                }
            }
        }
    }

    /// When the account started scrobbling; the first chart week starts here.
    pub async fn registered_at(&self) -> Result<DateTime<Utc>> {
        let response: UserResponse = self.call("user.getinfo", &[]).await?;
        let unixtime = response.user.registered.unixtime;
        DateTime::from_timestamp(unixtime, 0)
            .ok_or_else(|| ChartError::Config(format!("invalid registration time {unixtime}")))
    }
}

#[async_trait]
impl ChartSource for LastFmClient {
    async fn fetch_week(&self, kind: ChartKind, week: WeekRange) -> Result<RawSnapshot> {
        let method = match kind {
            ChartKind::Track => "user.getweeklytrackchart",
            ChartKind::Album => "user.getweeklyalbumchart",
            ChartKind::Artist => "user.getweeklyartistchart",
        };
        let params = [
            ("from", week.from.to_string()),
            ("to", week.to.to_string()),
            ("limit", kind.profile().chart_limit.to_string()),
        ];
        let response: ChartResponse = self.call(method, &params).await?;
        response.chart.into_raw(kind, week)
    }
}

#[async_trait]
impl AlbumInfoSource for LastFmClient {
    async fn fetch_album(&self, key: &AlbumKey) -> Result<AlbumInfo> {
        let params = [("album", key.name.clone()), ("artist", key.artist.clone())];
        let response: AlbumResponse = self.call("album.getinfo", &params).await?;
        Ok(response.album.into())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Error { error: i64, message: String },
    Ok(T),
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<Envelope<T>> {
    Ok(serde_json::from_str(body)?)
}

/// Last.fm collapses one-element lists into a bare object.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Deserialize)]
struct ChartResponse {
    #[serde(alias = "weeklytrackchart", alias = "weeklyalbumchart", alias = "weeklyartistchart")]
    chart: ChartBody,
}

#[derive(Deserialize)]
struct ChartBody {
    #[serde(default, alias = "track", alias = "album", alias = "artist")]
    items: OneOrMany<ChartItem>,
    #[serde(rename = "@attr")]
    attr: Option<WeekAttr>,
}

#[derive(Deserialize)]
struct ChartItem {
    #[serde(default)]
    mbid: String,
    name: String,
    #[serde(default)]
    artist: Option<ArtistRef>,
    playcount: String,
    #[serde(rename = "@attr")]
    attr: RankAttr,
}

#[derive(Deserialize)]
struct ArtistRef {
    #[serde(default)]
    mbid: String,
    #[serde(rename = "#text")]
    name: String,
}

#[derive(Deserialize)]
struct RankAttr {
    rank: String,
}

#[derive(Deserialize)]
struct WeekAttr {
    from: String,
    to: String,
}

impl ChartBody {
    fn into_raw(self, kind: ChartKind, requested: WeekRange) -> Result<RawSnapshot> {
        let week = match self.attr {
            Some(attr) => WeekRange::new(
                parse_number(kind, requested, "from", &attr.from)?,
                parse_number(kind, requested, "to", &attr.to)?,
            ),
            None => requested,
        };

        let entries = Vec::from(self.items)
            .into_iter()
            .map(|item| {
                let (artist_id, artist_name) = match item.artist {
                    Some(artist) => (Some(artist.mbid), Some(artist.name)),
                    None => (None, None),
                };
                Ok(RawChartEntry {
                    id: Some(item.mbid),
                    name: item.name,
                    artist_id,
                    artist_name,
                    play_count: parse_number(kind, week, "playcount", &item.playcount)?,
                    rank: parse_number(kind, week, "rank", &item.attr.rank)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RawSnapshot { week, entries })
    }
}

fn parse_number<N: std::str::FromStr>(kind: ChartKind, week: WeekRange, field: &str, value: &str) -> Result<N> {
    value
        .trim()
        .parse()
        .map_err(|_| ChartError::malformed(kind, week, format!("{field} `{value}` is not a number")))
}

#[derive(Deserialize)]
struct UserResponse {
    user: UserBody,
}

#[derive(Deserialize)]
struct UserBody {
    registered: Registered,
}

#[derive(Deserialize)]
struct Registered {
    #[serde(deserialize_with = "number_or_string")]
    unixtime: i64,
}

fn number_or_string<'de, D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize)]
struct AlbumResponse {
    album: AlbumBody,
}

#[derive(Deserialize)]
struct AlbumBody {
    name: String,
    artist: String,
    #[serde(default)]
    tracks: Option<TrackList>,
}

#[derive(Deserialize)]
struct TrackList {
    #[serde(default)]
    track: OneOrMany<TrackName>,
}

#[derive(Deserialize)]
struct TrackName {
    name: String,
}

impl From<AlbumBody> for AlbumInfo {
    fn from(body: AlbumBody) -> Self {
        AlbumInfo {
            name: body.name,
            artist: body.artist,
            tracks: body
                .tracks
                .map(|list| Vec::from(list.track).into_iter().map(|t| t.name).collect())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEEK: WeekRange = WeekRange {
        from: 1_704_412_800,
        to: 1_705_017_599,
    };

    #[test]
    fn track_chart_decodes_into_a_raw_page() {
        let body = r##"{"weeklytrackchart":{"track":[
            {"artist":{"mbid":"a1","#text":"David Bowie"},"@attr":{"rank":"1"},"mbid":"t1","name":"Heroes","playcount":"12"},
            {"artist":{"mbid":"","#text":"David Bowie"},"@attr":{"rank":"2"},"mbid":"","name":"Low","playcount":"7"}
        ],"@attr":{"from":"1704412800","to":"1705017599","user":"ziggy"}}}"##;

        let response = match decode::<ChartResponse>(body).unwrap() {
            Envelope::Ok(response) => response,
            Envelope::Error { .. } => panic!("decoded as an error"),
        };
        let page = response.chart.into_raw(ChartKind::Track, WEEK).unwrap();

        assert_eq!(page.week, WEEK);
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].play_count, 12);
        assert_eq!(page.entries[0].artist_name.as_deref(), Some("David Bowie"));
        assert_eq!(page.entries[1].rank, 2);
        assert_eq!(page.entries[1].id.as_deref(), Some(""));
    }

    #[test]
    fn single_artist_chart_is_not_a_list() {
        let body = r#"{"weeklyartistchart":{"artist":{"@attr":{"rank":"1"},"mbid":"","name":"Iggy Pop","playcount":"3"},
            "@attr":{"from":"1704412800","to":"1705017599"}}}"#;
        let Envelope::Ok(response) = decode::<ChartResponse>(body).unwrap() else {
            panic!("decoded as an error");
        };
        let page = response.chart.into_raw(ChartKind::Artist, WEEK).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert!(page.entries[0].artist_name.is_none());
    }

    #[test]
    fn unparsable_counts_are_malformed() {
        let body = r##"{"weeklyalbumchart":{"album":[{"artist":{"#text":"X"},"@attr":{"rank":"one"},"name":"Low","playcount":"3"}],
            "@attr":{"from":"1704412800","to":"1705017599"}}}"##;
        let Envelope::Ok(response) = decode::<ChartResponse>(body).unwrap() else {
            panic!("decoded as an error");
        };
        let err = response.chart.into_raw(ChartKind::Album, WEEK).unwrap_err();
        assert!(matches!(err, ChartError::MalformedRecord { .. }));
    }

    #[test]
    fn empty_weeks_have_no_items() {
        let body = r#"{"weeklytrackchart":{"track":[],"@attr":{"from":"1704412800","to":"1705017599"}}}"#;
        let Envelope::Ok(response) = decode::<ChartResponse>(body).unwrap() else {
            panic!("decoded as an error");
        };
        assert!(response.chart.into_raw(ChartKind::Track, WEEK).unwrap().entries.is_empty());
    }

    #[test]
    fn error_documents_are_recognized() {
        let body = r#"{"error":29,"message":"Rate Limit Exceeded"}"#;
        match decode::<ChartResponse>(body).unwrap() {
            Envelope::Error { error, message } => {
                assert_eq!(error, 29);
                assert_eq!(message, "Rate Limit Exceeded");
            }
            Envelope::Ok(_) => panic!("decoded an error as a chart"),
        }
    }

    #[test]
    fn album_tracklists_and_registration() {
        let body = r#"{"album":{"name":"Low","artist":"David Bowie","mbid":"x",
            "tracks":{"track":[{"name":"Speed of Life"},{"name":"Breaking Glass"}]}}}"#;
        let Envelope::Ok(response) = decode::<AlbumResponse>(body).unwrap() else {
            panic!("decoded as an error");
        };
        let info = AlbumInfo::from(response.album);
        assert_eq!(info.tracks.len(), 2);
        assert!(info.contains_track("breaking glass"));

        let body = r##"{"user":{"name":"ziggy","playcount":"10","registered":{"unixtime":"1104537600","#text":1104537600}}}"##;
        let Envelope::Ok(user) = decode::<UserResponse>(body).unwrap() else {
            panic!("decoded as an error");
        };
        assert_eq!(user.user.registered.unixtime, 1_104_537_600);
    }

    #[test]
    fn client_requires_credentials() {
        assert!(matches!(
            LastFmClient::new(LastFmSettings::default()),
            Err(ChartError::Config(_))
        ));
    }
}
