use super::{ACCOUNT, REGION, SimulatedProvider};
use infragraph::{PropertySpec, PropertyType, Value};

pub fn providers() -> Vec<SimulatedProvider> {
    vec![ecr_repository(), code_repository(), build_project(), pipeline()]
}

fn ecr_repository() -> SimulatedProvider {
    SimulatedProvider::new("ecr_repository", "ecr", "ecr")
        .property("repository_name", PropertySpec::optional(PropertyType::String).immutable())
        .property("scan_on_push", PropertySpec::optional(PropertyType::Bool))
        .outputs(|repo| {
            let name = repo.name("repository_name");
            vec![
                (
                    "repository_uri",
                    Value::from(format!("{ACCOUNT}.dkr.ecr.{REGION}.sim/{name}")),
                ),
                ("repository_name", Value::from(name)),
            ]
        })
}

fn code_repository() -> SimulatedProvider {
    SimulatedProvider::new("code_repository", "repo", "codecommit")
        .property("repository_name", PropertySpec::required(PropertyType::String).immutable())
        .property("description", PropertySpec::optional(PropertyType::String))
        .outputs(|repo| {
            let name = repo.name("repository_name");
            vec![
                (
                    "clone_url_http",
                    Value::from(format!("https://git-codecommit.{REGION}.sim/v1/repos/{name}")),
                ),
                ("repository_name", Value::from(name)),
            ]
        })
}

fn build_project() -> SimulatedProvider {
    SimulatedProvider::new("build_project", "build", "codebuild")
        .property("project_name", PropertySpec::optional(PropertyType::String).immutable())
        .property("source", PropertySpec::required(PropertyType::String))
        .property("image_repository", PropertySpec::required(PropertyType::String))
        .property("build_image", PropertySpec::optional(PropertyType::String))
        .property("privileged", PropertySpec::optional(PropertyType::Bool))
        .property("commands", PropertySpec::optional(PropertyType::List))
        .property("artifacts", PropertySpec::optional(PropertyType::List))
        .outputs(|project| vec![("project_name", Value::from(project.name("project_name")))])
}

fn pipeline() -> SimulatedProvider {
    SimulatedProvider::new("pipeline", "pipe", "codepipeline")
        .property("pipeline_name", PropertySpec::optional(PropertyType::String).immutable())
        .property("stages", PropertySpec::required(PropertyType::List))
        .property("source_repository", PropertySpec::required(PropertyType::String))
        .property("build_project", PropertySpec::required(PropertyType::String))
        .property("deploy_service", PropertySpec::required(PropertyType::String))
        .property("deploy_cluster", PropertySpec::optional(PropertyType::String))
        .property("image_file", PropertySpec::optional(PropertyType::String))
        .check(|properties| {
            let Some(Value::List(stages)) = properties.get("stages") else {
                return Ok(());
            };
            if stages.len() < 2 {
                anyhow::bail!("a pipeline needs at least two stages, got {}", stages.len());
            }
            let mut seen = std::collections::HashSet::new();
            if let Some(dup) = stages
                .iter()
                .filter_map(Value::as_str)
                .find(|s| !seen.insert(*s))
            {
                anyhow::bail!("duplicate stage '{dup}'");
            }
            Ok(())
        })
        .outputs(|pipe| vec![("pipeline_name", Value::from(pipe.name("pipeline_name")))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use infragraph::{ApplyRequest, ChangeKind, Properties, Provider};

    fn props(pairs: &[(&str, Value)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_repository_uri_uses_name() {
        let properties = props(&[("repository_name", "web".into())]);
        let applied = ecr_repository()
            .apply(&ApplyRequest {
                resource_id: "images",
                kind: ChangeKind::Create,
                properties: &properties,
                previous: None,
            })
            .unwrap();
        assert_eq!(
            applied.outputs["repository_uri"],
            Value::from("000000000000.dkr.ecr.local-1.sim/web")
        );
    }

    #[test]
    fn test_pipeline_stages() {
        let base = |stages: Vec<&str>| {
            props(&[
                ("stages", Value::from(stages)),
                ("source_repository", "repo-1".into()),
                ("build_project", "build-1".into()),
                ("deploy_service", "svc-1".into()),
            ])
        };
        let pipeline = pipeline();
        assert!(pipeline.validate(&base(vec!["Source", "Build", "Deploy"])).is_ok());
        assert!(pipeline.validate(&base(vec!["Source"])).is_err());
        let err = pipeline
            .validate(&base(vec!["Source", "Build", "Source"]))
            .unwrap_err();
        assert_eq!(err.to_string(), "duplicate stage 'Source'");
    }
}
