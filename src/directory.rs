//! Course directory
//!
//! Maps each course code to its subject group and geographic attributes. Loaded
//! once per run from a delimited file; read-only afterwards.

use crate::error::ComputeError;
use crate::schema::normalize_code;
use crate::types::{CourseCode, SubjectGroupCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Municipality used when the directory carries none
pub const UNKNOWN_MUNICIPALITY: &str = "Indefinido";

/// Attributes of one course
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseEntry {
    pub course_code: CourseCode,
    pub subject_group: SubjectGroupCode,
    pub region: String,
    pub state: String,
    pub institution: String,
    pub name: String,
    pub municipality: Option<String>,
}

impl CourseEntry {
    pub fn municipality_or_default(&self) -> &str {
        self.municipality.as_deref().unwrap_or(UNKNOWN_MUNICIPALITY)
    }
}

/// A directory row as it appears on disk; accepts both naming conventions
#[derive(Debug, Deserialize)]
struct DirectoryRow {
    #[serde(default, alias = "Código", alias = "CO_CURSO", alias = "Codigo")]
    course_code: Option<String>,
    #[serde(default, alias = "CO_GRUPO")]
    subject_group: Option<String>,
    #[serde(default, alias = "CO_REGIAO_CURSO")]
    region: Option<String>,
    #[serde(default, alias = "CO_UF_CURSO")]
    state: Option<String>,
    #[serde(default, alias = "CO_IES")]
    institution: Option<String>,
    #[serde(default, alias = "Curso", alias = "NOME_CURSO")]
    name: Option<String>,
    #[serde(default, alias = "Município", alias = "Municipio")]
    municipality: Option<String>,
}

impl DirectoryRow {
    fn into_entry(self) -> Option<CourseEntry> {
        let code = |v: Option<String>| v.map(|s| normalize_code(&s)).filter(|s| !s.is_empty());
        let text = |v: Option<String>| {
            v.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        Some(CourseEntry {
            course_code: code(self.course_code)?,
            subject_group: code(self.subject_group)?,
            region: code(self.region).unwrap_or_default(),
            state: code(self.state).unwrap_or_default(),
            institution: code(self.institution).unwrap_or_default(),
            name: text(self.name).unwrap_or_default(),
            municipality: text(self.municipality),
        })
    }
}

/// Lookup from course code to [`CourseEntry`]
#[derive(Debug, Clone, Default)]
pub struct CourseDirectory {
    entries: BTreeMap<CourseCode, CourseEntry>,
    dropped_rows: u64,
}

impl CourseDirectory {
    /// Build from entries; the first entry for a course code wins
    pub fn from_entries(entries: impl IntoIterator<Item = CourseEntry>) -> Self {
        let mut directory = Self::default();
        for entry in entries {
            directory.insert(entry);
        }
        directory
    }

    fn insert(&mut self, entry: CourseEntry) {
        if self.entries.contains_key(&entry.course_code) {
            tracing::debug!(course = %entry.course_code, "duplicate directory row ignored");
            return;
        }
        self.entries.insert(entry.course_code.clone(), entry);
    }

    /// Load a directory file
    ///
    /// Rows without a course code or subject group, and rows that fail to
    /// parse, are dropped and counted.
    pub fn load_csv(path: &Path, delimiter: u8) -> Result<Self, ComputeError> {
        let file = std::fs::File::open(path).map_err(|e| ComputeError::io(path, e))?;
        let directory = Self::from_reader(file, delimiter)?;
        tracing::info!(
            path = %path.display(),
            courses = directory.len(),
            dropped = directory.dropped_rows,
            "loaded course directory"
        );
        Ok(directory)
    }

    pub fn from_reader(source: impl std::io::Read, delimiter: u8) -> Result<Self, ComputeError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(source);
        let headers = csv::StringRecord::from_byte_record_lossy(reader.byte_headers()?.clone());
        let headers = trim_headers(&headers);

        let mut directory = Self::default();
        let mut raw = csv::ByteRecord::new();
        while reader.read_byte_record(&mut raw)? {
            let record = csv::StringRecord::from_byte_record_lossy(raw.clone());
            let row: Result<DirectoryRow, _> = record.deserialize(Some(&headers));
            match row.ok().and_then(DirectoryRow::into_entry) {
                Some(entry) => directory.insert(entry),
                None => directory.dropped_rows += 1,
            }
        }

        if directory.dropped_rows > 0 {
            tracing::warn!(dropped = directory.dropped_rows, "dropped incomplete directory rows");
        }
        Ok(directory)
    }

    pub fn subject_group_of(&self, course: &str) -> Option<&SubjectGroupCode> {
        self.entries.get(course).map(|e| &e.subject_group)
    }

    pub fn entry(&self, course: &str) -> Option<&CourseEntry> {
        self.entries.get(course)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CourseEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dropped_rows(&self) -> u64 {
        self.dropped_rows
    }
}

fn trim_headers(headers: &csv::StringRecord) -> csv::StringRecord {
    headers
        .iter()
        .map(|h| h.trim().trim_matches('"').trim())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn entry(code: &str, group: &str) -> CourseEntry {
        CourseEntry {
            course_code: code.into(),
            subject_group: group.into(),
            region: "2".into(),
            state: "23".into(),
            institution: "583".into(),
            name: "Engenharia".into(),
            municipality: None,
        }
    }

    #[test]
    fn test_from_entries_keeps_first_duplicate() {
        let mut second = entry("100", "99");
        second.name = "Other".into();
        let directory = CourseDirectory::from_entries(vec![entry("100", "40"), second]);

        assert_eq!(directory.len(), 1);
        assert_eq!(directory.subject_group_of("100").map(String::as_str), Some("40"));
        assert_eq!(directory.entry("100").unwrap().name, "Engenharia");
        assert!(directory.entry("101").is_none());
    }

    #[test]
    fn test_load_with_source_column_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "Código;CO_GRUPO;CO_REGIAO_CURSO;CO_UF_CURSO;CO_IES;Curso;Município\n\
             100;40;2;23.0;583;Engenharia Civil;Fortaleza\n\
             \"101\";5710;2;23;583;Medicina;\n\
             ;40;2;23;583;Sem Código;Sobral\n\
             102;;2;23;583;Sem Grupo;Sobral\n"
        )
        .unwrap();

        let directory = CourseDirectory::load_csv(file.path(), b';').unwrap();
        assert_eq!(directory.len(), 2);
        assert_eq!(directory.dropped_rows(), 2);

        let civil = directory.entry("100").unwrap();
        assert_eq!(
            civil,
            &CourseEntry {
                course_code: "100".into(),
                subject_group: "40".into(),
                region: "2".into(),
                state: "23".into(),
                institution: "583".into(),
                name: "Engenharia Civil".into(),
                municipality: Some("Fortaleza".into()),
            }
        );
        let med = directory.entry("101").unwrap();
        assert_eq!(med.municipality_or_default(), UNKNOWN_MUNICIPALITY);
    }

    #[test]
    fn test_load_with_plain_column_names() {
        let data = "course_code,subject_group,region,state,institution,name\n\
                    7,40,1,11,9,Direito\n";
        let directory = CourseDirectory::from_reader(data.as_bytes(), b',').unwrap();
        assert_eq!(directory.entry("7").unwrap().institution, "9");
        assert_eq!(directory.entry("7").unwrap().municipality, None);
    }

    #[test]
    fn test_load_missing_file() {
        let result = CourseDirectory::load_csv(Path::new("/nonexistent/dir.csv"), b';');
        assert!(matches!(result, Err(ComputeError::Io { .. })));
    }
}
