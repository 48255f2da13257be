//! CSV export of assessment records for back-office use.

use crate::store::ProfileStore;
use crate::{AssessmentRecord, Result};
use std::fs::File;
use std::path::Path;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow<'a> {
    user_id: &'a str,
    population: &'a str,
    module_id: &'a str,
    record_id: String,
    completed: bool,
    answer_count: usize,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl<'a> CsvRow<'a> {
    fn new(population: &'a str, record: &'a AssessmentRecord) -> Self {
        CsvRow {
            user_id: &record.user_id,
            population,
            module_id: &record.module_id,
            record_id: record.id.to_string(),
            completed: record.completed,
            answer_count: record.answers.len(),
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
            completed_at: record.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Write every stored assessment record to `csv_path`
///
/// The file is replaced, written with headers, and synced to disk before
/// returning the number of rows written. Rows are ordered by user id, then
/// module id.
pub fn export_records_csv(store: &dyn ProfileStore, csv_path: &Path) -> Result<usize> {
    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(File::create(csv_path)?);

    let mut count = 0;
    for user_id in store.user_ids()? {
        let state = store.load(&user_id)?;
        let population = state.population.as_deref().unwrap_or("");
        for record in state.records.values() {
            writer.serialize(CsvRow::new(population, record))?;
            count += 1;
        }
    }

    // Flush and sync to disk
    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    file.sync_all()?;

    tracing::info!("Exported {} assessment records to {:?}", count, csv_path);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::default_registry;
    use crate::store::{FileProfileStore, MemoryProfileStore};
    use crate::{Answers, ProfileAggregator};

    fn answers(json: &str) -> Answers {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_export_writes_one_row_per_record() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileProfileStore::new(temp_dir.path().join("profiles"));
        let agg = ProfileAggregator::new(default_registry().unwrap(), store.clone());

        agg.set_population("b-user", Some("athlete")).unwrap();
        let saves = [
            ("b-user", "nutrition", r#"{"diet_pattern": "vegan"}"#, true),
            ("a-user", "sleep-stress", r#"{"sleep_hours": 7}"#, false),
            ("a-user", "nutrition", r#"{"meals_per_day": 3}"#, false),
        ];
        for (user, module, payload, completed) in saves {
            agg.save_module_to_profile(user, module, answers(payload), completed)
                .unwrap();
        }

        let csv_path = temp_dir.path().join("export/records.csv");
        let count = export_records_csv(&store, &csv_path).unwrap();
        assert_eq!(count, 3);

        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "user_id");
        assert_eq!(&headers[2], "module_id");

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        let keys: Vec<(&str, &str)> = rows.iter().map(|r| (&r[0], &r[2])).collect();
        assert_eq!(
            keys,
            vec![
                ("a-user", "nutrition"),
                ("a-user", "sleep-stress"),
                ("b-user", "nutrition"),
            ]
        );
        assert_eq!(&rows[2][1], "athlete");
        assert_eq!(&rows[2][4], "true");
        assert!(!rows[2][8].is_empty());
        assert!(rows[0][8].is_empty());
    }

    #[test]
    fn test_export_empty_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let csv_path = temp_dir.path().join("records.csv");

        let count = export_records_csv(&MemoryProfileStore::new(), &csv_path).unwrap();
        assert_eq!(count, 0);
        assert!(csv_path.exists());
    }
}
