#[cfg(test)]
mod tests {
    use crate::types::*;

    #[test]
    fn etl_name_camel_cases_words() {
        assert_eq!(EtlName::new("oai pmh").unwrap().as_str(), "OaiPmh");
        assert_eq!(EtlName::new("my-etl_2").unwrap().as_str(), "MyEtl2");
        assert_eq!(EtlName::new("Plain").unwrap().as_str(), "Plain");
    }

    #[test]
    fn etl_name_rejects_empty() {
        assert!(EtlName::new("").is_err());
        assert!(EtlName::new("---").is_err());
    }

    #[test]
    fn status_busy_classification() {
        assert!(EtlStatus::Queued.is_busy());
        assert!(EtlStatus::Harvesting.is_busy());
        assert!(EtlStatus::Aborting.is_busy());
        assert!(EtlStatus::Cancelling.is_busy());
        assert!(!EtlStatus::Idle.is_busy());
        assert!(!EtlStatus::Done.is_busy());
        assert!(!EtlStatus::Initializing.is_busy());
    }

    #[test]
    fn health_worst_prefers_init_failure() {
        assert_eq!(
            EtlHealth::LoadingFailed.worst(EtlHealth::InitializationFailed),
            EtlHealth::InitializationFailed
        );
        assert_eq!(EtlHealth::Ok.worst(EtlHealth::ExtractionFailed), EtlHealth::ExtractionFailed);
        assert_eq!(EtlHealth::Ok.worst(EtlHealth::Ok), EtlHealth::Ok);
        // Same rank keeps the first value.
        assert_eq!(
            EtlHealth::ExtractionFailed.worst(EtlHealth::LoadingFailed),
            EtlHealth::ExtractionFailed
        );
    }

    #[test]
    fn health_display_matches_wire_tags() {
        assert_eq!(EtlHealth::Ok.to_string(), "OK");
        assert_eq!(EtlHealth::LoadingFailed.to_string(), "LOADING_FAILED");
        assert_eq!(EtlHealth::InitializationFailed.to_string(), "INITIALIZATION_FAILED");
    }

    #[test]
    fn deployment_type_parses_case_insensitively() {
        assert_eq!(DeploymentType::parse("docker"), DeploymentType::Docker);
        assert_eq!(DeploymentType::parse("JETTY"), DeploymentType::Jetty);
        assert_eq!(DeploymentType::parse("unit_test"), DeploymentType::UnitTest);
        assert_eq!(DeploymentType::parse("something"), DeploymentType::Other);
        assert_eq!(DeploymentType::parse(""), DeploymentType::Other);
    }

    #[test]
    fn status_serde_round_trip() {
        let json = serde_json::to_string(&EtlStatus::Harvesting).unwrap();
        assert_eq!(json, "\"harvesting\"");
        let back: EtlStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EtlStatus::Harvesting);
    }
}
