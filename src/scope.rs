//! Scope classification
//!
//! Decides which of the five nested populations a course's respondents count
//! toward. Course and Nation always apply; Region, State and Institution apply
//! only when the course matches the configured target.

use crate::config::TargetScopes;
use crate::directory::CourseEntry;
use crate::types::ScopeKey;

#[derive(Debug, Clone, Default)]
pub struct ScopeClassifier {
    targets: TargetScopes,
}

impl ScopeClassifier {
    pub fn new(targets: TargetScopes) -> Self {
        Self { targets }
    }

    pub fn targets(&self) -> &TargetScopes {
        &self.targets
    }

    /// Scopes a respondent of `course` contributes to, narrowest first
    pub fn classify(&self, course: &CourseEntry) -> Vec<ScopeKey> {
        let mut scopes = vec![ScopeKey::Course(course.course_code.clone())];

        if !self.is_relevant_group(&course.subject_group) {
            return scopes;
        }

        if matches(&self.targets.institution, &course.institution) {
            scopes.push(ScopeKey::Institution(course.institution.clone()));
        }
        if matches(&self.targets.state, &course.state) {
            scopes.push(ScopeKey::State(course.state.clone()));
        }
        if matches(&self.targets.region, &course.region) {
            scopes.push(ScopeKey::Region(course.region.clone()));
        }
        scopes.push(ScopeKey::Nation);
        scopes
    }

    /// True when aggregate scopes accept this subject group
    pub fn is_relevant_group(&self, group: &str) -> bool {
        self.targets
            .relevant_groups
            .as_ref()
            .map_or(true, |groups| groups.contains(group))
    }
}

fn matches(target: &Option<String>, value: &str) -> bool {
    target.as_deref().is_some_and(|t| !value.is_empty() && t == value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn course(state: &str, institution: &str, group: &str) -> CourseEntry {
        CourseEntry {
            course_code: "100".into(),
            subject_group: group.into(),
            region: "2".into(),
            state: state.into(),
            institution: institution.into(),
            name: "Curso".into(),
            municipality: None,
        }
    }

    fn targets() -> TargetScopes {
        TargetScopes {
            region: Some("2".into()),
            state: Some("23".into()),
            institution: Some("583".into()),
            relevant_groups: None,
        }
    }

    #[test]
    fn test_target_course_gets_all_scopes() {
        let classifier = ScopeClassifier::new(targets());
        assert_eq!(
            classifier.classify(&course("23", "583", "40")),
            vec![
                ScopeKey::Course("100".into()),
                ScopeKey::Institution("583".into()),
                ScopeKey::State("23".into()),
                ScopeKey::Region("2".into()),
                ScopeKey::Nation,
            ]
        );
    }

    #[test]
    fn test_other_state_same_region() {
        let classifier = ScopeClassifier::new(targets());
        assert_eq!(
            classifier.classify(&course("22", "999", "40")),
            vec![
                ScopeKey::Course("100".into()),
                ScopeKey::Region("2".into()),
                ScopeKey::Nation,
            ]
        );
    }

    #[test]
    fn test_no_targets_means_course_and_nation() {
        let classifier = ScopeClassifier::default();
        assert_eq!(
            classifier.classify(&course("23", "583", "40")),
            vec![ScopeKey::Course("100".into()), ScopeKey::Nation]
        );
    }

    #[test]
    fn test_irrelevant_group_only_counts_for_its_course() {
        let mut t = targets();
        t.relevant_groups = Some(["40".to_string()].into_iter().collect());
        let classifier = ScopeClassifier::new(t);

        assert_eq!(classifier.classify(&course("23", "583", "40")).len(), 5);
        assert_eq!(
            classifier.classify(&course("23", "583", "5710")),
            vec![ScopeKey::Course("100".into())]
        );
    }
}
