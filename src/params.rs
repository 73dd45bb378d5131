//! Named-Parameter Processing
//!
//! Converts `:name` named-parameter SQL templates into the positional
//! placeholder dialect of the target engine and binds values from a request's
//! JSON `params` object:
//!
//! - PostgreSQL: `$1..$n`, one placeholder per distinct name (repeats reuse
//!   the same number)
//! - MySQL / SQLite / DB2: `?`, one placeholder per occurrence (repeats bind
//!   the value again)
//!
//! The scanner does not fire inside single-quoted string literals and leaves
//! `::type` casts untouched.

use serde_json::Value;

use crate::engine::EngineKind;
use crate::error::ParamError;

/// A converted query ready for engine submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedQuery {
    /// SQL with positional placeholders in the engine's dialect
    pub sql: String,
    /// Bound values in placeholder order
    pub params: Vec<Value>,
}

/// Convert a named-parameter template and bind values for `engine_kind`.
///
/// `params_json` must be a JSON object (or `Null`, treated as empty). A
/// `:name` in the template with no corresponding key fails with
/// [`ParamError::MissingParameter`].
pub fn process_parameters(
    sql_template: &str,
    params_json: &Value,
    engine_kind: EngineKind,
) -> Result<ProcessedQuery, ParamError> {
    let empty = serde_json::Map::new();
    let params = match params_json {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return Err(ParamError::NotAnObject(type_name(other).to_string()));
        }
    };

    let mut sql = String::with_capacity(sql_template.len());
    let mut ordered: Vec<Value> = Vec::new();
    // Distinct names in first-use order, for the numbered dialect
    let mut seen: Vec<String> = Vec::new();

    // Everything that is not a parameter is copied verbatim from the
    // template as whole byte slices. Slices only start and end at ASCII
    // bytes (quotes, colons, name characters), so multibyte UTF-8 text
    // passes through untouched.
    let bytes = sql_template.as_bytes();
    let mut i = 0;
    let mut plain_start = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                // String literal: scan to the closing quote, nothing inside
                // is a parameter
                i += 1;
                while i < bytes.len() && bytes[i] != b'\'' {
                    i += 1;
                }
                if i < bytes.len() {
                    i += 1;
                }
            }
            b':' => {
                // '::' is a cast, not a parameter
                if bytes.get(i + 1) == Some(&b':') {
                    i += 2;
                    continue;
                }

                let name_start = i + 1;
                let mut end = name_start;
                while end < bytes.len() && is_name_byte(bytes[end], end > name_start) {
                    end += 1;
                }

                if end == name_start {
                    // Bare colon (e.g. time literal); not a parameter
                    i += 1;
                    continue;
                }

                sql.push_str(&sql_template[plain_start..i]);

                let name = &sql_template[name_start..end];
                let value = params
                    .get(name)
                    .ok_or_else(|| ParamError::MissingParameter(name.to_string()))?;
                check_bindable(name, value)?;

                match engine_kind {
                    EngineKind::Postgres => {
                        let position = match seen.iter().position(|n| n == name) {
                            Some(p) => p,
                            None => {
                                seen.push(name.to_string());
                                ordered.push(value.clone());
                                seen.len() - 1
                            }
                        };
                        sql.push('$');
                        sql.push_str(&(position + 1).to_string());
                    }
                    EngineKind::Mysql | EngineKind::Sqlite | EngineKind::Db2 => {
                        sql.push('?');
                        ordered.push(value.clone());
                    }
                }
                i = end;
                plain_start = end;
            }
            _ => {
                i += 1;
            }
        }
    }
    sql.push_str(&sql_template[plain_start..]);

    Ok(ProcessedQuery {
        sql,
        params: ordered,
    })
}

fn is_name_byte(b: u8, after_first: bool) -> bool {
    b == b'_' || b.is_ascii_alphabetic() || (after_first && b.is_ascii_digit())
}

fn check_bindable(name: &str, value: &Value) -> Result<(), ParamError> {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(()),
        Value::Array(_) | Value::Object(_) => {
            Err(ParamError::UnsupportedType(name.to_string()))
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_postgres_numbered_placeholders() {
        let processed = process_parameters(
            "SELECT * FROM users WHERE id = :id AND name = :name",
            &json!({"id": 7, "name": "ada"}),
            EngineKind::Postgres,
        )
        .unwrap();

        assert_eq!(
            processed.sql,
            "SELECT * FROM users WHERE id = $1 AND name = $2"
        );
        assert_eq!(processed.params, vec![json!(7), json!("ada")]);
    }

    #[test]
    fn test_postgres_repeated_name_reuses_number() {
        let processed = process_parameters(
            "SELECT :a + :b + :a",
            &json!({"a": 1, "b": 2}),
            EngineKind::Postgres,
        )
        .unwrap();

        assert_eq!(processed.sql, "SELECT $1 + $2 + $1");
        assert_eq!(processed.params, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_question_mark_dialect_repeats_value() {
        let processed = process_parameters(
            "SELECT :a + :b + :a",
            &json!({"a": 1, "b": 2}),
            EngineKind::Sqlite,
        )
        .unwrap();

        assert_eq!(processed.sql, "SELECT ? + ? + ?");
        assert_eq!(processed.params, vec![json!(1), json!(2), json!(1)]);
    }

    #[test]
    fn test_cast_is_not_a_parameter() {
        let processed = process_parameters(
            "SELECT :id::bigint",
            &json!({"id": 5}),
            EngineKind::Postgres,
        )
        .unwrap();

        assert_eq!(processed.sql, "SELECT $1::bigint");
        assert_eq!(processed.params, vec![json!(5)]);
    }

    #[test]
    fn test_string_literal_is_untouched() {
        let processed = process_parameters(
            "SELECT ':not_a_param', :real FROM t",
            &json!({"real": true}),
            EngineKind::Mysql,
        )
        .unwrap();

        assert_eq!(processed.sql, "SELECT ':not_a_param', ? FROM t");
        assert_eq!(processed.params, vec![json!(true)]);
    }

    #[test]
    fn test_missing_parameter() {
        let err = process_parameters(
            "SELECT :present, :absent",
            &json!({"present": 1}),
            EngineKind::Postgres,
        )
        .unwrap_err();
        assert_eq!(err, ParamError::MissingParameter("absent".to_string()));
    }

    #[test]
    fn test_params_must_be_object() {
        let err =
            process_parameters("SELECT 1", &json!([1, 2]), EngineKind::Postgres).unwrap_err();
        assert_eq!(err, ParamError::NotAnObject("array".to_string()));
    }

    #[test]
    fn test_null_params_is_empty() {
        let processed =
            process_parameters("SELECT 1", &Value::Null, EngineKind::Postgres).unwrap();
        assert_eq!(processed.sql, "SELECT 1");
        assert!(processed.params.is_empty());
    }

    #[test]
    fn test_nested_value_unsupported() {
        let err = process_parameters(
            "SELECT :blob",
            &json!({"blob": {"nested": true}}),
            EngineKind::Sqlite,
        )
        .unwrap_err();
        assert_eq!(err, ParamError::UnsupportedType("blob".to_string()));
    }

    #[test]
    fn test_multibyte_literal_is_untouched() {
        let processed = process_parameters(
            "SELECT 'café' FROM menu WHERE id = :id",
            &json!({"id": 3}),
            EngineKind::Sqlite,
        )
        .unwrap();
        assert_eq!(processed.sql, "SELECT 'café' FROM menu WHERE id = ?");
        assert_eq!(processed.params, vec![json!(3)]);
    }

    #[test]
    fn test_multibyte_identifier_passes_through() {
        let processed = process_parameters(
            "SELECT :n AS številka, 'höhe' FROM größen",
            &json!({"n": 1}),
            EngineKind::Postgres,
        )
        .unwrap();
        assert_eq!(processed.sql, "SELECT $1 AS številka, 'höhe' FROM größen");
    }

    #[test]
    fn test_bare_colon_passes_through() {
        let processed = process_parameters(
            "SELECT '12' || ':' || '30', :h",
            &json!({"h": 12}),
            EngineKind::Sqlite,
        )
        .unwrap();
        assert_eq!(processed.sql, "SELECT '12' || ':' || '30', ?");
    }
}
