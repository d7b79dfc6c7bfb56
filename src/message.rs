use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a transcript entry. Serialized as `"user"` / `"ai"` to stay
/// compatible with the transcript snapshots the backend and older clients
/// already produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "ai")]
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "map")]
    Map,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// One pin on an embedded map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMarker {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

/// One entry of a map payload.
///
/// Facility searches produce the `center` + `markers` shape; the geocoding
/// path returns a single flat object (`name`/`address`/`lat`/`lng`) instead.
/// Both are kept in the same struct so a normalized payload is always a
/// plain list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<MapMarker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
}

/// The `data` field of a chat response: either a list of map entries or a
/// single geocoder-style object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MapDataField {
    List(Vec<MapData>),
    Single(Box<MapData>),
}

/// Normalizes a map payload to a list.
///
/// Single-object geocoder results are wrapped into a one-element list; if
/// such an object carries an `address` but no `desc`, the address is copied
/// into `desc` so the map view always has a caption to show. Lists pass
/// through untouched, which makes the normalization idempotent.
pub fn normalize_map_data(data: MapDataField) -> Vec<MapData> {
    match data {
        MapDataField::List(entries) => entries,
        MapDataField::Single(mut entry) => {
            let missing_desc = entry.desc.as_deref().map_or(true, |d| d.is_empty());
            if missing_desc && entry.address.is_some() {
                entry.desc = entry.address.clone();
            }
            vec![*entry]
        }
    }
}

/// One entry in a conversation transcript. Append-only: entries are never
/// edited in place, and the whole transcript is only discarded by an
/// explicit reset or the unload hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<MapData>>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            kind: MessageKind::Text,
            content: content.into(),
            link: None,
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            kind: MessageKind::Text,
            content: content.into(),
            link: None,
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant_map(
        content: impl Into<String>,
        link: Option<String>,
        data: Option<Vec<MapData>>,
    ) -> Self {
        Self {
            role: MessageRole::Assistant,
            kind: MessageKind::Map,
            content: content.into(),
            link,
            data,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geocoder_entry() -> MapData {
        MapData {
            center: Some(GeoPoint {
                lat: 37.5665,
                lng: 126.978,
            }),
            markers: Vec::new(),
            name: Some("서울시청".to_string()),
            address: Some("서울 중구 세종대로 110".to_string()),
            desc: None,
            lat: Some(37.5665),
            lng: Some(126.978),
        }
    }

    #[test]
    fn single_object_is_wrapped_and_address_copied_to_desc() {
        let normalized = normalize_map_data(MapDataField::Single(Box::new(geocoder_entry())));

        assert_eq!(normalized.len(), 1);
        assert_eq!(
            normalized[0].desc.as_deref(),
            Some("서울 중구 세종대로 110")
        );
        // The original address stays in place.
        assert_eq!(
            normalized[0].address.as_deref(),
            Some("서울 중구 세종대로 110")
        );
    }

    #[test]
    fn existing_desc_is_not_overwritten() {
        let mut entry = geocoder_entry();
        entry.desc = Some("이미 있는 설명".to_string());

        let normalized = normalize_map_data(MapDataField::Single(Box::new(entry)));
        assert_eq!(normalized[0].desc.as_deref(), Some("이미 있는 설명"));
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_map_data(MapDataField::Single(Box::new(geocoder_entry())));
        let twice = normalize_map_data(MapDataField::List(once.clone()));
        assert_eq!(once, twice);
    }

    #[test]
    fn list_payload_passes_through() {
        let entries = vec![MapData {
            center: Some(GeoPoint {
                lat: 35.1,
                lng: 129.0,
            }),
            markers: vec![MapMarker {
                name: "어린이대공원".to_string(),
                lat: 35.1,
                lng: 129.0,
                desc: Some("부산진구".to_string()),
            }],
            name: None,
            address: None,
            desc: None,
            lat: None,
            lng: None,
        }];

        let normalized = normalize_map_data(MapDataField::List(entries.clone()));
        assert_eq!(normalized, entries);
    }

    #[test]
    fn data_field_decodes_object_or_list() {
        let single: MapDataField =
            serde_json::from_str(r#"{"name":"A","lat":1.0,"lng":2.0,"address":"X"}"#)
                .expect("single object");
        assert!(matches!(single, MapDataField::Single(_)));

        let list: MapDataField =
            serde_json::from_str(r#"[{"center":{"lat":1.0,"lng":2.0},"markers":[]}]"#)
                .expect("list");
        assert!(matches!(list, MapDataField::List(_)));
    }

    #[test]
    fn message_serializes_with_wire_field_names() {
        let msg = Message::user("안녕");
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["role"], "user");
        assert_eq!(json["type"], "text");

        let reply = Message::assistant_map("지도예요", Some("https://map.kakao.com".into()), None);
        let json = serde_json::to_value(&reply).expect("serialize");
        assert_eq!(json["role"], "ai");
        assert_eq!(json["type"], "map");
        assert!(json.get("data").is_none());
    }
}
