//! Category enrichers.
//!
//! Each enricher annotates one record in place. Records that lack the fields
//! an enricher depends on are either passed through or rejected, depending on
//! whether the category's endpoints can legitimately return such records.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

pub(super) type Record = Map<String, Value>;

fn number(record: &Record, field: &str) -> Option<f64> {
    record.get(field).and_then(Value::as_f64)
}

/// Market orders, price lists and daily history rows.
pub(super) fn market(record: &mut Record) -> Result<(), String> {
    if let Some(price) = number(record, "price") {
        let remain = number(record, "volume_remain")
            .ok_or_else(|| "market order is missing 'volume_remain'".to_string())?;
        let total = number(record, "volume_total").unwrap_or(remain);
        let side = match record.get("is_buy_order").and_then(Value::as_bool) {
            Some(true) => "buy",
            _ => "sell",
        };
        let fill_ratio = if total > 0.0 { (total - remain) / total } else { 0.0 };

        record.insert("order_side".into(), json!(side));
        record.insert("total_value".into(), json!(price * remain));
        record.insert("fill_ratio".into(), json!(fill_ratio));
        return Ok(());
    }

    if let (Some(average), Some(adjusted)) = (
        number(record, "average_price"),
        number(record, "adjusted_price"),
    ) {
        if adjusted > 0.0 {
            record.insert("price_spread_ratio".into(), json!(average / adjusted));
        }
        return Ok(());
    }

    if let (Some(highest), Some(lowest), Some(average)) = (
        number(record, "highest"),
        number(record, "lowest"),
        number(record, "average"),
    ) {
        if average > 0.0 {
            record.insert("daily_range_ratio".into(), json!((highest - lowest) / average));
        }
        return Ok(());
    }

    Err("unrecognised market record: no price fields".to_string())
}

pub(super) fn size_tier(member_count: u64) -> &'static str {
    match member_count {
        0..=9 => "small",
        10..=99 => "medium",
        100..=999 => "large",
        _ => "massive",
    }
}

pub(super) fn corporation(record: &mut Record) -> Result<(), String> {
    let members = record
        .get("member_count")
        .and_then(Value::as_u64)
        .ok_or_else(|| "corporation record is missing 'member_count'".to_string())?;
    record.insert("size_tier".into(), json!(size_tier(members)));

    if let Some(rate) = number(record, "tax_rate") {
        record.insert("tax_rate_percent".into(), json!(rate * 100.0));
    }
    Ok(())
}

/// Security class of a security status, after rounding to one decimal place.
pub(super) fn security_class(status: f64) -> &'static str {
    let rounded = (status * 10.0).round() / 10.0;
    if rounded >= 0.5 {
        "highsec"
    } else if rounded > 0.0 {
        "lowsec"
    } else {
        "nullsec"
    }
}

pub(super) fn character(record: &mut Record, now: DateTime<Utc>) -> Result<(), String> {
    if let Some(status) = number(record, "security_status") {
        record.insert("security_class".into(), json!(security_class(status)));
    }

    if let Some(birthday) = record.get("birthday").and_then(Value::as_str) {
        let born = DateTime::parse_from_rfc3339(birthday)
            .map_err(|e| format!("invalid character birthday '{}': {}", birthday, e))?;
        let age_days = (now - born.with_timezone(&Utc)).num_days().max(0);
        record.insert("age_days".into(), json!(age_days));
    }
    Ok(())
}

/// Systems carry `security_status`; other universe records pass through.
pub(super) fn universe(record: &mut Record) -> Result<(), String> {
    if let Some(status) = number(record, "security_status") {
        record.insert("security_class".into(), json!(security_class(status)));
    }
    Ok(())
}

pub(super) fn sovereignty(record: &mut Record) -> Result<(), String> {
    let kind = if record.get("alliance_id").is_some_and(|v| !v.is_null()) {
        "alliance"
    } else if record.get("faction_id").is_some_and(|v| !v.is_null()) {
        "faction"
    } else {
        "unclaimed"
    };
    record.insert("holder_kind".into(), json!(kind));
    Ok(())
}
