use crate::map::facility::{group_rows, Facility, FacilityRow, Program};
use crate::map::viewport::LatLngBounds;
use crate::message::MapDataField;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: String,
}

/// Chat completion as returned by `POST /api/chat`. Everything except
/// `type` is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub data: Option<MapDataField>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusEvent {
    status: String,
}

/// The remote backend the clients talk to. Abstracted so the session and
/// map controllers can be exercised against in-process fakes.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Facilities inside `bounds`, optionally filtered by mid-level
    /// category.
    async fn facilities(
        &self,
        bounds: &LatLngBounds,
        category2: Option<&str>,
    ) -> Result<Vec<Facility>>;

    async fn programs(&self, facility_id: i64) -> Result<Vec<Program>>;

    /// Server-push status updates for one conversation. The stream simply
    /// ends on transport errors; malformed events never surface.
    async fn status_stream(&self, conversation_id: &str) -> Result<BoxStream<'static, String>>;
}

/// reqwest-backed implementation of [`ChatBackend`].
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Connect timeout only; the chat call itself carries no deadline, so a
    /// hung backend shows up as a stuck loading flag rather than a client
    /// error.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(request)
            .send()
            .await
            .context("Chat request failed")?
            .error_for_status()
            .context("Chat request returned an error status")?;

        response
            .json()
            .await
            .context("Failed to decode chat response")
    }

    async fn facilities(
        &self,
        bounds: &LatLngBounds,
        category2: Option<&str>,
    ) -> Result<Vec<Facility>> {
        let mut request = self
            .client
            .get(format!("{}/facilities", self.base_url))
            .query(&[
                ("minLat", bounds.min_lat),
                ("maxLat", bounds.max_lat),
                ("minLon", bounds.min_lon),
                ("maxLon", bounds.max_lon),
            ]);

        if let Some(category2) = category2 {
            request = request.query(&[("category2", category2)]);
        }

        let response = request
            .send()
            .await
            .context("Facility search failed")?
            .error_for_status()
            .context("Facility search returned an error status")?;

        let body = response
            .text()
            .await
            .context("Failed to read facility list")?;
        decode_facilities(&body)
    }

    async fn programs(&self, facility_id: i64) -> Result<Vec<Program>> {
        let response = self
            .client
            .get(format!("{}/programs", self.base_url))
            .query(&[("facility_id", facility_id)])
            .send()
            .await
            .context("Program fetch failed")?
            .error_for_status()
            .context("Program fetch returned an error status")?;

        response
            .json()
            .await
            .context("Failed to decode program list")
    }

    async fn status_stream(&self, conversation_id: &str) -> Result<BoxStream<'static, String>> {
        let response = self
            .client
            .get(format!(
                "{}/api/chat/stream/{}",
                self.base_url, conversation_id
            ))
            .send()
            .await
            .context("Status stream request failed")?
            .error_for_status()
            .context("Status stream returned an error status")?;

        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(error) => {
                        debug!(%error, "status stream closed");
                        break;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Events may straddle chunk boundaries; only complete lines
                // are parsed.
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].to_string();
                    buffer.drain(..=pos);

                    if let Some(status) = parse_event_line(&line) {
                        yield status;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

/// Decodes a facility search response. Newer deployments return structured
/// facility records; older ones return the flat spreadsheet rows, one row
/// per program, which are grouped client-side.
fn decode_facilities(body: &str) -> Result<Vec<Facility>> {
    if let Ok(facilities) = serde_json::from_str::<Vec<Facility>>(body) {
        return Ok(facilities);
    }

    let rows: Vec<FacilityRow> =
        serde_json::from_str(body).context("Failed to decode facility list")?;
    Ok(group_rows(rows))
}

/// Extracts the status text from one `data: {...}` event line. Anything
/// else (comments, keep-alives, malformed JSON) yields nothing.
fn parse_event_line(line: &str) -> Option<String> {
    let payload = line.trim().strip_prefix("data:")?.trim();
    let event: StatusEvent = serde_json::from_str(payload).ok()?;
    Some(event.status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::normalize_map_data;

    #[test]
    fn event_line_parsing() {
        assert_eq!(
            parse_event_line(r#"data: {"status": "요청 분석 중.."}"#).as_deref(),
            Some("요청 분석 중..")
        );
        // Extra fields are fine.
        assert_eq!(
            parse_event_line(r#"data:{"conversation_id":"x","status":"검색 중"}"#).as_deref(),
            Some("검색 중")
        );
        // Malformed or unrelated lines are ignored.
        assert_eq!(parse_event_line(""), None);
        assert_eq!(parse_event_line(": keep-alive"), None);
        assert_eq!(parse_event_line("data: not json"), None);
        assert_eq!(parse_event_line(r#"data: {"other":"field"}"#), None);
    }

    #[test]
    fn facility_payload_decodes_both_shapes() {
        let structured = decode_facilities(
            r#"[{"id":3,"name":"국민체육센터","lat":35.1,"lon":129.0,"category2":"생활체육관"}]"#,
        )
        .expect("structured");
        assert_eq!(structured.len(), 1);
        assert_eq!(structured[0].id, 3);

        // Flat spreadsheet rows are grouped into one facility per site.
        let grouped = decode_facilities(
            r#"[
                {"Name":"국민체육센터","LAT":35.1,"LON":129.0,"Note":"수영"},
                {"Name":"국민체육센터","LAT":35.1,"LON":129.0,"Note":"농구"}
            ]"#,
        )
        .expect("rows");
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].programs.len(), 2);

        assert!(decode_facilities("{}").is_err());
    }

    #[test]
    fn chat_response_decodes_map_with_single_object_data() {
        let response: ChatResponse = serde_json::from_str(
            r#"{
                "type": "map",
                "content": "",
                "link": "https://map.kakao.com/link/map/서울시청,37.5665,126.978",
                "conversation_id": "abc",
                "data": {"name":"서울시청","lat":37.5665,"lng":126.978,"address":"세종대로 110"}
            }"#,
        )
        .expect("response");

        assert_eq!(response.kind.as_deref(), Some("map"));
        let normalized = normalize_map_data(response.data.expect("data"));
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].desc.as_deref(), Some("세종대로 110"));
    }

    #[test]
    fn chat_response_decodes_plain_text() {
        let response: ChatResponse =
            serde_json::from_str(r#"{"type":"text","content":"안녕하세요!"}"#).expect("response");

        assert_eq!(response.kind.as_deref(), Some("text"));
        assert_eq!(response.content.as_deref(), Some("안녕하세요!"));
        assert!(response.data.is_none());
    }
}
