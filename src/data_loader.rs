use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use crate::dataset::{is_numeric_dtype, Dataset};
use crate::error::{PipelineError, Result};

/// A 0/1-coded clinical flag and the labels its codes are recoded to.
#[derive(Debug, Clone)]
pub struct FlagField {
    pub name: String,
    pub zero_label: String,
    pub one_label: String,
}

impl FlagField {
    pub fn new(name: &str, zero_label: &str, one_label: &str) -> Self {
        Self {
            name: name.to_string(),
            zero_label: zero_label.to_string(),
            one_label: one_label.to_string(),
        }
    }

    fn yes_no(name: &str) -> Self {
        Self::new(name, "no", "yes")
    }
}

/// Fixed column layout of the input file.
#[derive(Debug, Clone)]
pub struct ClinicalSchema {
    pub numeric: Vec<String>,
    pub flags: Vec<FlagField>,
    pub age: String,
    pub outcome: String,
}

impl ClinicalSchema {
    /// Heart failure clinical records: 12 predictors and the death event outcome.
    pub fn heart_failure() -> Self {
        Self {
            numeric: [
                "creatinine_phosphokinase",
                "ejection_fraction",
                "platelets",
                "serum_creatinine",
                "serum_sodium",
                "time",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            flags: vec![
                FlagField::yes_no("anaemia"),
                FlagField::yes_no("diabetes"),
                FlagField::yes_no("high_blood_pressure"),
                FlagField::new("sex", "female", "male"),
                FlagField::yes_no("smoking"),
            ],
            age: "age".to_string(),
            outcome: "DEATH_EVENT".to_string(),
        }
    }

    /// Columns in output order: age, numeric fields, flags, outcome.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = vec![self.age.clone()];
        columns.extend(self.numeric.iter().cloned());
        columns.extend(self.flags.iter().map(|f| f.name.clone()));
        columns.push(self.outcome.clone());
        columns
    }
}

/// Fixed-width, non-overlapping bands covering `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeBands {
    start: f64,
    width: f64,
    count: usize,
}

impl AgeBands {
    pub fn new(start: f64, width: f64, end: f64) -> Result<Self> {
        if !(width > 0.0) || !(end > start) || !start.is_finite() || !end.is_finite() {
            return Err(PipelineError::config(format!(
                "age bands need width > 0 and end > start, got start={} width={} end={}",
                start, width, end
            )));
        }
        let bands = (end - start) / width;
        if (bands - bands.round()).abs() > 1e-9 {
            return Err(PipelineError::config(format!(
                "age band width {} does not divide [{}, {})",
                width, start, end
            )));
        }
        Ok(Self {
            start,
            width,
            count: bands.round() as usize,
        })
    }

    pub fn end(&self) -> f64 {
        self.start + self.width * self.count as f64
    }

    /// Band labels in ascending order.
    pub fn labels(&self) -> Vec<String> {
        (0..self.count).map(|i| self.band_label(i)).collect()
    }

    fn band_label(&self, index: usize) -> String {
        let lo = self.start + self.width * index as f64;
        format!("[{},{})", lo, lo + self.width)
    }

    /// Label of the band holding `value`, or `None` outside the covered range.
    pub fn label(&self, value: f64) -> Option<String> {
        if !value.is_finite() || value < self.start || value >= self.end() {
            return None;
        }
        let index = (((value - self.start) / self.width).floor() as usize).min(self.count - 1);
        Some(self.band_label(index))
    }
}

/// Reads and cleans the clinical records file.
pub struct DataLoader {
    path: PathBuf,
    schema: ClinicalSchema,
    age_bands: AgeBands,
}

impl DataLoader {
    pub fn new<P: AsRef<Path>>(path: P, schema: ClinicalSchema, age_bands: AgeBands) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            schema,
            age_bands,
        }
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<Dataset> {
        let raw = self.read_raw()?;
        let data = self.clean(raw)?;
        info!(rows = data.len(), columns = data.frame().width(), "Records loaded");
        Ok(data)
    }

    /// Parses the file without touching its values.
    pub fn read_raw(&self) -> Result<DataFrame> {
        let file = File::open(&self.path).map_err(|e| {
            PipelineError::Load(format!("cannot open {}: {}", self.path.display(), e))
        })?;

        let frame = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(None)
            .into_reader_with_file_handle(file)
            .finish()
            .map_err(|e| {
                PipelineError::Load(format!("cannot parse {}: {}", self.path.display(), e))
            })?;

        debug!(shape = ?frame.shape(), "Raw frame parsed");
        Ok(frame)
    }

    /// Schema check, missingness check, flag recoding and age banding.
    pub fn clean(&self, raw: DataFrame) -> Result<Dataset> {
        let columns = self.schema.columns();
        for name in &columns {
            let column = raw.column(name).map_err(|_| {
                PipelineError::Load(format!(
                    "{}: required column '{}' is missing",
                    self.path.display(),
                    name
                ))
            })?;
            if !is_numeric_dtype(column.dtype()) {
                return Err(PipelineError::Load(format!(
                    "{}: column '{}' should be numeric but parsed as {}",
                    self.path.display(),
                    name,
                    column.dtype()
                )));
            }
        }

        let frame = raw.select(columns)?;
        let summary = missingness(&frame);
        debug!(?summary, "Missing values per field");
        check_complete(&frame)?;

        let data = Dataset::new(frame, self.schema.outcome.clone())?;
        data.labels()?;

        let mut recodes = Vec::with_capacity(self.schema.flags.len());
        for flag in &self.schema.flags {
            for (row, value) in data.numeric_values(&flag.name)?.into_iter().enumerate() {
                if value != 0.0 && value != 1.0 {
                    return Err(PipelineError::data_quality(format!(
                        "flag '{}' has code {} at row {}, expected 0 or 1",
                        flag.name, value, row
                    )));
                }
            }
            recodes.push(
                when(col(flag.name.as_str()).eq(lit(1)))
                    .then(lit(flag.one_label.clone()))
                    .otherwise(lit(flag.zero_label.clone()))
                    .alias(flag.name.as_str()),
            );
        }

        let ages = data
            .numeric_values(&self.schema.age)?
            .into_iter()
            .enumerate()
            .map(|(row, age)| {
                self.age_bands.label(age).ok_or_else(|| {
                    PipelineError::data_quality(format!(
                        "'{}' value {} at row {} is outside [{}, {})",
                        self.schema.age,
                        age,
                        row,
                        self.age_bands.start,
                        self.age_bands.end()
                    ))
                })
            })
            .collect::<Result<Vec<String>>>()?;

        let mut frame = data.into_frame().lazy().with_columns(recodes).collect()?;
        frame.with_column(Series::new(self.schema.age.as_str().into(), ages))?;

        Dataset::new(frame, self.schema.outcome.clone())
    }
}

/// Per-field count of missing values.
pub fn missingness(frame: &DataFrame) -> Vec<(String, usize)> {
    frame
        .get_columns()
        .iter()
        .map(|column| (column.name().to_string(), column.null_count()))
        .collect()
}

fn check_complete(frame: &DataFrame) -> Result<()> {
    for column in frame.get_columns() {
        let missing = column.null_count();
        if missing == 0 {
            continue;
        }
        let first = column
            .as_materialized_series()
            .is_null()
            .into_iter()
            .position(|is_null| is_null == Some(true))
            .unwrap_or(0);
        return Err(PipelineError::data_quality(format!(
            "field '{}' has {} missing value(s), first at row {}",
            column.name(),
            missing,
            first
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "age,anaemia,creatinine_phosphokinase,diabetes,ejection_fraction,high_blood_pressure,platelets,serum_creatinine,serum_sodium,sex,smoking,time,DEATH_EVENT";

    fn write_csv(rows: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", HEADER).unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn loader(file: &NamedTempFile) -> DataLoader {
        DataLoader::new(
            file.path(),
            ClinicalSchema::heart_failure(),
            AgeBands::new(30.0, 10.0, 100.0).unwrap(),
        )
    }

    #[test]
    fn test_age_bands_cover_range_once() {
        let bands = AgeBands::new(30.0, 10.0, 100.0).unwrap();
        assert_eq!(bands.labels().len(), 7);
        assert_eq!(bands.label(30.0).as_deref(), Some("[30,40)"));
        assert_eq!(bands.label(39.999).as_deref(), Some("[30,40)"));
        assert_eq!(bands.label(60.667).as_deref(), Some("[60,70)"));
        assert_eq!(bands.label(99.9).as_deref(), Some("[90,100)"));
        assert_eq!(bands.label(100.0), None);
        assert_eq!(bands.label(29.0), None);
    }

    #[test]
    fn test_age_bands_reject_bad_width() {
        assert!(AgeBands::new(30.0, 0.0, 100.0).is_err());
        assert!(AgeBands::new(30.0, 15.0, 100.0).is_err());
        assert!(AgeBands::new(100.0, 10.0, 30.0).is_err());
    }

    #[test]
    fn test_load_recodes_flags_and_bands_age() {
        let file = write_csv(&[
            "75,0,582,0,20,1,265000,1.9,130,1,0,4,1",
            "60.667,1,151,1,38,0,262000,1.1,137,0,1,115,0",
        ]);
        let data = loader(&file).load().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.outcome(), "DEATH_EVENT");
        assert_eq!(
            data.string_values("age").unwrap(),
            vec!["[70,80)", "[60,70)"]
        );
        assert_eq!(data.string_values("anaemia").unwrap(), vec!["no", "yes"]);
        assert_eq!(data.string_values("sex").unwrap(), vec!["male", "female"]);
        assert_eq!(data.labels().unwrap(), vec![1.0, 0.0]);
        assert_eq!(data.numeric_values("time").unwrap(), vec![4.0, 115.0]);
    }

    #[test]
    fn test_missing_value_fails_with_field_context() {
        let file = write_csv(&[
            "75,0,582,0,20,1,265000,1.9,130,1,0,4,1",
            "65,0,,0,38,0,262000,1.1,137,0,1,115,0",
        ]);
        match loader(&file).load() {
            Err(PipelineError::DataQuality(msg)) => {
                assert!(msg.contains("creatinine_phosphokinase"), "{}", msg);
                assert!(msg.contains("row 1"), "{}", msg);
            }
            other => panic!("expected data quality error, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_flag_code_fails() {
        let file = write_csv(&["75,2,582,0,20,1,265000,1.9,130,1,0,4,1"]);
        assert!(matches!(
            loader(&file).load(),
            Err(PipelineError::DataQuality(_))
        ));
    }

    #[test]
    fn test_age_outside_bands_fails() {
        let file = write_csv(&["105,0,582,0,20,1,265000,1.9,130,1,0,4,1"]);
        assert!(matches!(
            loader(&file).load(),
            Err(PipelineError::DataQuality(_))
        ));
    }

    #[test]
    fn test_missing_column_is_load_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "age,anaemia").unwrap();
        writeln!(file, "75,0").unwrap();
        file.flush().unwrap();
        assert!(matches!(loader(&file).load(), Err(PipelineError::Load(_))));
    }

    #[test]
    fn test_unreadable_path_is_load_error() {
        let loader = DataLoader::new(
            "/nonexistent/heart.csv",
            ClinicalSchema::heart_failure(),
            AgeBands::new(30.0, 10.0, 100.0).unwrap(),
        );
        assert!(matches!(loader.load(), Err(PipelineError::Load(_))));
    }

    #[test]
    fn test_missingness_summary() {
        let frame = df!(
            "a" => [Some(1.0), None, None],
            "b" => [Some(1i64), Some(2), Some(3)]
        )
        .unwrap();
        assert_eq!(
            missingness(&frame),
            vec![("a".to_string(), 2), ("b".to_string(), 0)]
        );
    }
}
