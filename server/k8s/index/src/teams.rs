use ahash::AHashSet;
use serde::Serialize;

use kobs_k8s_api::{ApplicationSpec, TeamSpec};

/// A team together with the applications which list it in their `teams`
/// field.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamView {
    #[serde(flatten)]
    pub team: TeamSpec,
    pub applications: Vec<ApplicationSpec>,
}

/// Builds the teams view. A team name is globally unique across clusters
/// and namespaces; duplicates after the first occurrence are dropped.
pub(crate) fn build(teams: Vec<TeamSpec>, applications: &[ApplicationSpec]) -> Vec<TeamView> {
    let mut seen = AHashSet::new();
    teams
        .into_iter()
        .filter(|team| seen.insert(team.name.clone()))
        .map(|team| {
            let applications = applications
                .iter()
                .filter(|application| application.teams.contains(&team.name))
                .cloned()
                .collect();
            TeamView { team, applications }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team(cluster: &str, name: &str) -> TeamSpec {
        TeamSpec {
            cluster: cluster.to_string(),
            namespace: "kobs".to_string(),
            name: name.to_string(),
            ..TeamSpec::default()
        }
    }

    fn application(name: &str, teams: &[&str]) -> ApplicationSpec {
        ApplicationSpec {
            cluster: "c1".to_string(),
            namespace: "default".to_string(),
            name: name.to_string(),
            teams: teams.iter().map(|t| t.to_string()).collect(),
            ..ApplicationSpec::default()
        }
    }

    #[test]
    fn duplicate_team_names_are_dropped_after_the_first() {
        let teams = vec![team("c1", "diablo"), team("c2", "diablo"), team("c2", "reapers")];
        let views = build(teams, &[]);

        assert_eq!(views.len(), 2);
        assert_eq!(views[0].team.name, "diablo");
        assert_eq!(views[0].team.cluster, "c1");
        assert_eq!(views[1].team.name, "reapers");
    }

    #[test]
    fn applications_are_attached_by_team_membership() {
        let teams = vec![team("c1", "diablo")];
        let applications = vec![
            application("app1", &["diablo"]),
            application("app2", &["reapers"]),
            application("app3", &["reapers", "diablo"]),
        ];
        let views = build(teams, &applications);

        let names: Vec<_> = views[0]
            .applications
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["app1", "app3"]);
    }
}
