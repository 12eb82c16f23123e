use serde_json::{Map, Value};

pub type Record = Map<String, Value>;

pub const STUDENT_ALIASES: &[&str] = &["student", "students"];
pub const COURSE_ALIASES: &[&str] = &["course", "courses"];

/// Looks up an embedded relation that may have been attached under any of
/// `aliases`. Joins return either a single object or a one-element array
/// depending on cardinality; both shapes resolve to the object.
///
/// The first alias holding a related object wins, even if later aliases
/// are populated too. Null and empty arrays count as absent.
pub fn resolve_related<'a>(record: &'a Record, aliases: &[&str]) -> Option<&'a Record> {
    for name in aliases {
        match record.get(*name) {
            None | Some(Value::Null) => continue,
            Some(Value::Array(items)) => match items.first().and_then(|v| v.as_object()) {
                Some(obj) => return Some(obj),
                None => continue,
            },
            Some(Value::Object(obj)) => return Some(obj),
            Some(_) => continue,
        }
    }
    None
}
