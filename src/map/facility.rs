use serde::{Deserialize, Serialize};

/// Program cost as delivered by the backend: sometimes a number, sometimes
/// free text ("입장금액없음", "3,000", ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CostValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub day: Option<String>,
    #[serde(default)]
    pub cost: Option<CostValue>,
    #[serde(default)]
    pub age_min: Option<i64>,
    #[serde(default)]
    pub age_max: Option<i64>,
}

impl Program {
    /// Whether the entry carries anything worth rendering. Blank notes and
    /// empty cost strings do not count.
    pub fn is_meaningful(&self) -> bool {
        let has_note = self.note.as_deref().is_some_and(|n| !n.trim().is_empty());
        let has_cost = match &self.cost {
            Some(CostValue::Number(_)) => true,
            Some(CostValue::Text(text)) => !text.trim().is_empty(),
            None => false,
        };

        has_note
            || self.time.is_some()
            || self.day.is_some()
            || has_cost
            || self.age_min.is_some()
            || self.age_max.is_some()
    }
}

/// One facility returned by the bounded search. Created fresh per query;
/// `programs` starts empty and is filled by a separate fetch once the
/// facility is selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub category1: Option<String>,
    #[serde(default)]
    pub category2: Option<String>,
    #[serde(default)]
    pub category3: Option<String>,
    #[serde(default)]
    pub in_out: Option<String>,
    #[serde(default)]
    pub programs: Vec<Program>,
}

/// Detail-page link on Kakao Map for a named coordinate.
pub fn kakao_map_link(name: &str, lat: f64, lng: f64) -> String {
    format!("https://map.kakao.com/link/map/{},{},{}", name, lat, lng)
}

fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if value < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

/// Display label for a program cost.
///
/// Numbers are grouped by thousands with a won suffix. The two recognized
/// free-text tokens are canonicalized with a space. Numeric-looking text
/// (possibly comma separated) is parsed and grouped; anything else passes
/// through trimmed. Blank text yields no label.
pub fn cost_label(cost: &CostValue) -> Option<String> {
    match cost {
        CostValue::Number(n) => Some(format!("{}원", group_thousands(*n as i64))),
        CostValue::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }

            let compact: String = trimmed.split_whitespace().collect();
            match compact.as_str() {
                "입장금액있음" => Some("입장금액 있음".to_string()),
                "입장금액없음" => Some("입장금액 없음".to_string()),
                _ => match trimmed.replace(',', "").parse::<i64>() {
                    Ok(n) => Some(format!("{}원", group_thousands(n))),
                    Err(_) => Some(trimmed.to_string()),
                },
            }
        }
    }
}

/// Display label for an age range. `age_max == 99` is the data set's
/// sentinel for "no upper bound".
pub fn age_label(age_min: Option<i64>, age_max: Option<i64>) -> Option<String> {
    match (age_min, age_max) {
        (Some(min), Some(99)) => Some(format!("{}세 이상", min)),
        (Some(min), Some(max)) => Some(format!("{} ~ {}세", min, max)),
        (Some(min), None) => Some(format!("{}세 이상", min)),
        (None, Some(max)) => Some(format!("{}세 이하", max)),
        (None, None) => None,
    }
}

/// One raw row as exported from the facility spreadsheet: facility columns
/// repeated per program, capitalized keys and all.
#[derive(Debug, Clone, Deserialize)]
pub struct FacilityRow {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Address", default)]
    pub address: Option<String>,
    #[serde(rename = "LAT")]
    pub lat: f64,
    #[serde(rename = "LON")]
    pub lon: f64,
    #[serde(rename = "Note", default)]
    pub note: Option<String>,
    #[serde(rename = "Time", default)]
    pub time: Option<String>,
    #[serde(rename = "Day", default)]
    pub day: Option<String>,
    #[serde(rename = "Cost", default)]
    pub cost: Option<CostValue>,
    #[serde(default)]
    pub age_min: Option<i64>,
    #[serde(default)]
    pub age_max: Option<i64>,
}

/// Folds raw rows into one facility per (name, lat, lon) with its program
/// list attached, preserving first-seen order. Rows carry no facility id,
/// so grouped records keep the default.
pub fn group_rows(rows: Vec<FacilityRow>) -> Vec<Facility> {
    let mut facilities: Vec<Facility> = Vec::new();
    let mut index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for row in rows {
        let key = format!("{}-{}-{}", row.name, row.lat, row.lon);
        let slot = match index.get(&key) {
            Some(&i) => i,
            None => {
                facilities.push(Facility {
                    id: 0,
                    name: row.name.clone(),
                    address: row.address.clone(),
                    lat: row.lat,
                    lon: row.lon,
                    category1: None,
                    category2: None,
                    category3: None,
                    in_out: None,
                    programs: Vec::new(),
                });
                index.insert(key, facilities.len() - 1);
                facilities.len() - 1
            }
        };

        facilities[slot].programs.push(Program {
            note: row.note,
            time: row.time,
            day: row.day,
            cost: row.cost,
            age_min: row.age_min,
            age_max: row.age_max,
        });
    }

    facilities
}
