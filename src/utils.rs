use std::io::Cursor;

use chrono::{DateTime, SecondsFormat, Utc};
use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Response};
use serde::Serializer;
use serde_json::Value;

pub fn try_respond(
    _req: &Request<'_>,
    json: &Value,
    status: Status,
) -> response::Result<'static> {
    let body = json.to_string();
    Response::build()
        .status(status)
        .header(ContentType::JSON)
        .sized_body(body.len(), Cursor::new(body))
        .ok()
}

pub fn serialize_date<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = date.to_rfc3339_opts(SecondsFormat::Millis, true);
    serializer.serialize_str(&s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Stamped {
        #[serde(serialize_with = "serialize_date")]
        at: DateTime<Utc>,
    }

    #[test]
    fn dates_render_with_millisecond_precision_and_z_suffix() {
        let at = Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap();
        let json = serde_json::to_value(Stamped { at }).unwrap();
        assert_eq!(json["at"], "2023-01-02T03:04:05.000Z");
    }
}
