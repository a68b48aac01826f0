use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use std::{collections::HashMap, sync::Arc};

/// Turn raw header cells into unique, non-empty column names.
/// Empty names become `Unnamed: <i>`; repeats get a `.1`, `.2`, ... suffix.
pub fn column_names(raw: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut names = Vec::with_capacity(raw.len());

    for (i, name) in raw.iter().enumerate() {
        let base = if name.trim().is_empty() {
            format!("Unnamed: {i}")
        } else {
            name.clone()
        };

        let mut candidate = base.clone();
        while let Some(count) = seen.get_mut(&candidate) {
            *count += 1;
            candidate = format!("{base}.{count}");
        }
        seen.insert(candidate.clone(), 0);
        names.push(candidate);
    }
    names
}

/// All-text schema straight from the header line.
pub fn utf8_schema(names: &[String]) -> SchemaRef {
    let fields: Vec<Field> = names
        .iter()
        .map(|n| Field::new(n, DataType::Utf8, true))
        .collect();
    Arc::new(Schema::new(fields))
}

/// Digits an f64 round-trips without loss.
const MAX_FLOAT_DIGITS: usize = 15;

fn is_integer(s: &str) -> bool {
    s.parse::<i64>().is_ok()
}

fn significant_digits(s: &str) -> usize {
    let mantissa = s.split(['e', 'E']).next().unwrap_or(s);
    mantissa
        .trim_start_matches(['+', '-'])
        .trim_start_matches(['0', '.'])
        .bytes()
        .filter(u8::is_ascii_digit)
        .count()
}

/// Parses as f64 and carries no more digits than an f64 keeps.
fn is_exact_float(s: &str) -> bool {
    s.parse::<f64>().map_or(false, f64::is_finite) && significant_digits(s) <= MAX_FLOAT_DIGITS
}

/// Narrowest of Int64 / Float64 / Utf8 that holds every non-null value
/// exactly. Integers beyond i64 and long digit strings stay Utf8, as do
/// columns without values.
pub fn infer_column_type(values: &[Option<String>]) -> DataType {
    let mut any = false;
    let mut all_int = true;

    for v in values.iter().flatten() {
        let v = v.trim();
        any = true;
        if all_int && is_integer(v) {
            continue;
        }
        all_int = false;
        if !is_exact_float(v) {
            return DataType::Utf8;
        }
    }

    match (any, all_int) {
        (false, _) => DataType::Utf8,
        (true, true) => DataType::Int64,
        (true, false) => DataType::Float64,
    }
}

/// Fix the output schema from the first chunk's columns.
pub fn infer_schema(names: &[String], columns: &[Vec<Option<String>>]) -> SchemaRef {
    let fields: Vec<Field> = names
        .iter()
        .zip(columns)
        .map(|(name, values)| Field::new(name, infer_column_type(values), true))
        .collect();
    Arc::new(Schema::new(fields))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn names_are_made_unique_and_non_empty() {
        let raw: Vec<String> = ["CP", "", "CP", "CP", "Total"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            column_names(&raw),
            vec!["CP", "Unnamed: 1", "CP.1", "CP.2", "Total"]
        );
    }

    #[test]
    fn infers_narrowest_type() {
        assert_eq!(
            infer_column_type(&col(&[Some("28001"), None, Some("28002")])),
            DataType::Int64
        );
        assert_eq!(
            infer_column_type(&col(&[Some("2"), Some("2.5")])),
            DataType::Float64
        );
        assert_eq!(
            infer_column_type(&col(&[Some("13.999"), Some("b'AAA'")])),
            DataType::Utf8
        );
        assert_eq!(infer_column_type(&col(&[None, None])), DataType::Utf8);
    }

    #[test]
    fn long_digit_strings_stay_text() {
        let ids = col(&[Some("12345678901234567891"), Some("12345678901234567892")]);
        assert_eq!(infer_column_type(&ids), DataType::Utf8);

        let precise = col(&[Some("1.2345678901234567")]);
        assert_eq!(infer_column_type(&precise), DataType::Utf8);

        let ok = col(&[Some("-0.000123"), Some("9007199254.5"), Some("1e3")]);
        assert_eq!(infer_column_type(&ok), DataType::Float64);
        assert_eq!(infer_column_type(&col(&[Some("inf")])), DataType::Utf8);
    }

    #[test]
    fn schema_is_nullable_and_ordered() {
        let names = vec!["CP".to_string(), "Producto".to_string()];
        let schema = infer_schema(
            &names,
            &[col(&[Some("28001")]), col(&[Some("Seguro Hogar")])],
        );
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(schema.field(1).data_type(), &DataType::Utf8);
        assert!(schema.fields().iter().all(|f| f.is_nullable()));
        assert_eq!(utf8_schema(&names).field(0).data_type(), &DataType::Utf8);
    }
}
