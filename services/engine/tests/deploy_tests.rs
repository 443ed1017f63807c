//! End-to-end deploys against the simulated cloud

use pretty_assertions::assert_eq;
use std::fs;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

use edgesite_engine::distribution::{
    DistributionConfig, EdgeEventType, MinimumProtocolVersion, SITE_ORIGIN_PATH,
};
use edgesite_engine::provider::{
    DnsService, RecordSpec, RecordTarget, RecordType, ResourceAction,
};
use edgesite_engine::stacks::{CertificateStack, Stack, ValidationSettings};
use edgesite_engine::{
    AlternateNames, ApexDomain, DeployConfig, DeployError, DeployResult, DeploymentPlan,
    DeploymentSummary, Orchestrator, ParameterExchange, Scope, SimulatedCloud,
};

const ACCOUNT: &str = "581911119805";

struct Fixture {
    _dir: TempDir,
    config: DeployConfig,
}

/// Config for `example.com` with both edge functions; the viewer-request
/// function is declared first on purpose
fn fixture(sans: &str, website_account: &str) -> Fixture {
    let dir = tempdir().unwrap();
    for (name, body) in [
        ("handle-subdomains-lambda", "exports.handler = async (e) => e;"),
        ("origin-redirect-lambda", "exports.handler = async (e) => e.Records[0];"),
    ] {
        let function_dir = dir.path().join("functions").join(name);
        fs::create_dir_all(&function_dir).unwrap();
        fs::write(function_dir.join("index.js"), body).unwrap();
    }

    let toml = format!(
        r#"
domain_name = "example.com"
san_domain_names = "{sans}"

[stacks.certificate]
account = "{ACCOUNT}"
region = "us-east-1"

[stacks.edge_functions]
account = "{ACCOUNT}"
region = "us-east-1"

[stacks.website]
account = "{website_account}"
region = "eu-west-1"

[[edge_functions]]
key = "subdomain"
event = "viewer-request"
runtime = "nodejs12.x"
code_dir = "functions/handle-subdomains-lambda"

[[edge_functions]]
key = "private-redirect"
event = "origin-request"
runtime = "nodejs12.x"
code_dir = "functions/origin-redirect-lambda"
"#
    );

    let config = DeployConfig::parse(&toml, dir.path()).unwrap();
    Fixture { _dir: dir, config }
}

async fn cloud_with_zone() -> SimulatedCloud {
    let cloud = SimulatedCloud::new();
    cloud.register_zone("example.com", true).await;
    cloud
}

fn plan(config: &DeployConfig) -> DeploymentPlan {
    DeploymentPlan::new(config.build_stacks().unwrap()).unwrap()
}

async fn deploy_all(cloud: &SimulatedCloud, config: &DeployConfig) -> DeployResult<DeploymentSummary> {
    Orchestrator::new(cloud, plan(config)).deploy(&[]).await
}

async fn distribution_config(cloud: &SimulatedCloud) -> DistributionConfig {
    let state = cloud.snapshot().await;
    assert_eq!(state.distributions.len(), 1);
    state.distributions.values().next().unwrap().config.clone()
}

#[tokio::test]
async fn test_example_com_with_www_and_blog() {
    let fixture = fixture("www,blog", ACCOUNT);
    let cloud = cloud_with_zone().await;

    let summary = deploy_all(&cloud, &fixture.config).await.unwrap();
    let order: Vec<&str> = summary.reports.iter().map(|r| r.stack.as_str()).collect();
    assert_eq!(order, vec!["CertificateStack", "EdgeFunctionStack", "WebsiteStack"]);

    let state = cloud.snapshot().await;

    // Certificate covers apex + alternates
    let site_arn = &summary.reports[0].outputs["SiteCertificateArn"];
    let site = state.certificate_by_arn(site_arn).unwrap();
    let names: Vec<&str> = site.names().collect();
    assert_eq!(names, vec!["example.com", "www.example.com", "blog.example.com"]);
    assert_eq!(site.region, "us-east-1");

    // Distribution
    let distribution = state.distributions.values().next().unwrap();
    let config = &distribution.config;
    assert_eq!(
        config.aliases,
        vec!["www.example.com", "blog.example.com", "example.com"]
    );
    assert_eq!(config.viewer_certificate.certificate_arn, *site_arn);
    assert_eq!(
        config.viewer_certificate.minimum_protocol_version,
        MinimumProtocolVersion::TlsV12_2021
    );
    assert_eq!(config.origin.origin_path, SITE_ORIGIN_PATH);
    assert_eq!(config.default_root_object, "index.html");
    assert_eq!(
        config.comment,
        "Cloudfront Distribution for website - example.com"
    );

    // Origin-request runs before viewer-request regardless of declaration order
    let events: Vec<EdgeEventType> = config
        .default_behavior
        .edge_associations
        .evaluation_order()
        .map(|a| a.event_type)
        .collect();
    assert_eq!(
        events,
        vec![EdgeEventType::OriginRequest, EdgeEventType::ViewerRequest]
    );

    // DNS
    let zone = state.zone_by_name("example.com").unwrap();
    assert_eq!(
        zone.record("example.com", RecordType::A).unwrap().target,
        RecordTarget::Alias(distribution.domain_name.clone())
    );
    for alternate in ["www.example.com", "blog.example.com"] {
        let record = zone.record(alternate, RecordType::CNAME).unwrap();
        assert_eq!(record.target, RecordTarget::Value("example.com".to_string()));
        assert_eq!(record.owner.as_deref(), Some("WebsiteStack"));
    }
    let identity = zone.record("auth.example.com", RecordType::A).unwrap();
    assert!(matches!(identity.target, RecordTarget::Alias(_)));

    let website = &summary.reports[2];
    assert_eq!(
        website.outputs["IdentityEndpoint"],
        "https://auth.example.com"
    );
    assert_eq!(website.resolved.len(), 4);
}

#[tokio::test]
async fn test_second_deploy_changes_nothing() {
    let fixture = fixture("www,blog", ACCOUNT);
    let cloud = cloud_with_zone().await;

    let first = deploy_all(&cloud, &fixture.config).await.unwrap();
    let before = cloud.snapshot().await;
    let second = deploy_all(&cloud, &fixture.config).await.unwrap();

    assert!(first.changed_resources() > 0);
    assert_eq!(second.changed_resources(), 0);
    assert!(second.is_unchanged());
    assert_ne!(first.run_id, second.run_id);

    let after = cloud.snapshot().await;
    assert_eq!(before.distributions, after.distributions);
    assert_eq!(before.parameters, after.parameters);
}

#[tokio::test]
async fn test_idempotent_across_state_file_reloads() {
    let fixture = fixture("www", ACCOUNT);
    let state_dir = tempdir().unwrap();
    let path = state_dir.path().join("state.json");

    let cloud = SimulatedCloud::open(&path).await.unwrap();
    cloud.register_zone("example.com", true).await;
    Orchestrator::new(&cloud, plan(&fixture.config))
        .with_checkpoint(&cloud)
        .deploy(&[])
        .await
        .unwrap();

    let reopened = SimulatedCloud::open(&path).await.unwrap();
    let summary = Orchestrator::new(&reopened, plan(&fixture.config))
        .with_checkpoint(&reopened)
        .deploy(&[])
        .await
        .unwrap();

    assert!(summary.is_unchanged());
}

#[tokio::test]
async fn test_producer_order_does_not_change_distribution() {
    let fixture = fixture("www,blog", ACCOUNT);

    let certificate_first = cloud_with_zone().await;
    let orchestrator = Orchestrator::new(&certificate_first, plan(&fixture.config));
    for stack in ["CertificateStack", "EdgeFunctionStack", "WebsiteStack"] {
        orchestrator.deploy_stack(stack).await.unwrap();
    }

    let functions_first = cloud_with_zone().await;
    let orchestrator = Orchestrator::new(&functions_first, plan(&fixture.config));
    for stack in ["EdgeFunctionStack", "CertificateStack", "WebsiteStack"] {
        orchestrator.deploy_stack(stack).await.unwrap();
    }

    assert_eq!(
        distribution_config(&certificate_first).await,
        distribution_config(&functions_first).await
    );
}

#[tokio::test]
async fn test_website_before_producers_is_not_ready() {
    let fixture = fixture("www", ACCOUNT);
    let cloud = cloud_with_zone().await;

    let err = Orchestrator::new(&cloud, plan(&fixture.config))
        .deploy(&["WebsiteStack".to_string()])
        .await
        .unwrap_err();

    match &err {
        DeployError::DependencyNotReady { key, region } => {
            assert_eq!(key, "example.com-SSLCertificate");
            assert_eq!(region, "us-east-1");
        }
        other => panic!("expected DependencyNotReady, got {other:?}"),
    }
    assert!(err.is_retryable());

    // Nothing provisioned before the reads fail
    let state = cloud.snapshot().await;
    assert!(state.distributions.is_empty());
    assert!(state.buckets.is_empty());
    assert!(state.origin_access_identities.is_empty());
}

#[tokio::test]
async fn test_website_before_edge_functions_is_not_ready() {
    let fixture = fixture("www", ACCOUNT);
    let cloud = cloud_with_zone().await;
    let orchestrator = Orchestrator::new(&cloud, plan(&fixture.config));

    orchestrator.deploy_stack("CertificateStack").await.unwrap();
    let err = orchestrator.deploy_stack("WebsiteStack").await.unwrap_err();

    assert!(matches!(err, DeployError::DependencyNotReady { .. }));
}

#[tokio::test]
async fn test_distribution_endpoint_change_leaves_cnames_alone() {
    let fixture = fixture("www,blog", ACCOUNT);
    let cloud = cloud_with_zone().await;
    deploy_all(&cloud, &fixture.config).await.unwrap();

    // Distribution endpoint moves outside of this deploy
    let mut state = cloud.snapshot().await;
    for distribution in state.distributions.values_mut() {
        distribution.domain_name = "dmoved12345.cloudfront.net".to_string();
    }
    let moved = SimulatedCloud::with_state(state);

    let report = Orchestrator::new(&moved, plan(&fixture.config))
        .deploy_stack("WebsiteStack")
        .await
        .unwrap();

    let action = |logical_id: &str| {
        report
            .changes
            .iter()
            .find(|c| c.logical_id == logical_id)
            .map(|c| c.action)
            .unwrap()
    };
    assert_eq!(action("example.com A"), ResourceAction::Updated);
    assert_eq!(action("www.example.com CNAME"), ResourceAction::Unchanged);
    assert_eq!(action("blog.example.com CNAME"), ResourceAction::Unchanged);

    let state = moved.snapshot().await;
    let zone = state.zone_by_name("example.com").unwrap();
    assert_eq!(
        zone.record("example.com", RecordType::A).unwrap().target,
        RecordTarget::Alias("dmoved12345.cloudfront.net".to_string())
    );
    assert_eq!(
        zone.record("www.example.com", RecordType::CNAME).unwrap().target,
        RecordTarget::Value("example.com".to_string())
    );
}

#[tokio::test]
async fn test_removed_alternate_records_are_deleted() {
    let cloud = cloud_with_zone().await;

    let before = fixture("www,blog", ACCOUNT);
    deploy_all(&cloud, &before.config).await.unwrap();

    let after = fixture("www", ACCOUNT);
    let summary = deploy_all(&cloud, &after.config).await.unwrap();

    let deleted = |report: usize| -> Vec<String> {
        summary.reports[report]
            .changes
            .iter()
            .filter(|c| c.action == ResourceAction::Deleted)
            .map(|c| c.logical_id.clone())
            .collect()
    };
    let certificate_deleted = deleted(0);
    assert_eq!(certificate_deleted.len(), 1);
    assert!(certificate_deleted[0].ends_with(".blog.example.com CNAME"));
    assert_eq!(deleted(2), vec!["blog.example.com CNAME"]);

    let state = cloud.snapshot().await;
    let zone = state.zone_by_name("example.com").unwrap();
    assert!(zone.record("blog.example.com", RecordType::CNAME).is_none());
    assert!(zone.records.values().all(|r| !r.name.ends_with("blog.example.com")));
    assert_eq!(
        zone.record("www.example.com", RecordType::CNAME).unwrap().target,
        RecordTarget::Value("example.com".to_string())
    );
    assert_eq!(
        distribution_config(&cloud).await.aliases,
        vec!["www.example.com", "example.com"]
    );

    // Converged
    assert!(deploy_all(&cloud, &after.config).await.unwrap().is_unchanged());
}

#[tokio::test]
async fn test_unavailable_store_fails_consumer() {
    let fixture = fixture("www", ACCOUNT);
    let cloud = cloud_with_zone().await;
    let orchestrator = Orchestrator::new(&cloud, plan(&fixture.config));

    orchestrator.deploy_stack("CertificateStack").await.unwrap();
    orchestrator.deploy_stack("EdgeFunctionStack").await.unwrap();

    cloud.set_available(false);
    let err = orchestrator.deploy_stack("WebsiteStack").await.unwrap_err();

    assert!(matches!(err, DeployError::Provider(_)));
    assert!(!err.is_retryable());
    assert!(cloud.snapshot().await.distributions.is_empty());
}

#[tokio::test]
async fn test_failed_stack_still_saves_state() {
    let fixture = fixture("www", ACCOUNT);
    let state_dir = tempdir().unwrap();
    let path = state_dir.path().join("state.json");

    let cloud = SimulatedCloud::open(&path).await.unwrap();
    let zone = cloud.register_zone("example.com", true).await;
    cloud
        .upsert_record(
            &zone.id,
            "LegacyStack",
            &RecordSpec {
                name: "www.example.com".to_string(),
                record_type: RecordType::CNAME,
                target: RecordTarget::Value("legacy.example.net".to_string()),
                comment: None,
            },
        )
        .await
        .unwrap();

    let err = Orchestrator::new(&cloud, plan(&fixture.config))
        .with_checkpoint(&cloud)
        .deploy(&[])
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Conflict(_)));

    let reopened = SimulatedCloud::open(&path).await.unwrap();
    let state = reopened.snapshot().await;
    assert_eq!(state.certificates.len(), 2);
    assert_eq!(state.functions.len(), 2);
    assert_eq!(state.parameters.values().map(|p| p.len()).sum::<usize>(), 4);
    // WebsiteStack got as far as the distribution before DNS failed
    assert_eq!(state.distributions.len(), 1);
}

#[tokio::test]
async fn test_validation_never_completes_in_undelegated_zone() {
    let cloud = SimulatedCloud::new();
    cloud.register_zone("example.com", false).await;

    let apex = ApexDomain::new("example.com").unwrap();
    let stack: Box<dyn Stack> = Box::new(CertificateStack::new(
        Scope::new(ACCOUNT, "us-east-1"),
        AlternateNames::parse(&apex, "www").unwrap(),
        ValidationSettings {
            timeout: Duration::from_millis(60),
            poll_interval: Duration::from_millis(10),
        },
    ));

    let orchestrator = Orchestrator::new(&cloud, DeploymentPlan::new(vec![stack]).unwrap());
    let err = orchestrator.deploy(&[]).await.unwrap_err();

    assert!(matches!(err, DeployError::ValidationTimeout { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_identity_certificate_for_wrong_hostname_rejected() {
    let fixture = fixture("www", ACCOUNT);
    let cloud = cloud_with_zone().await;
    let orchestrator = Orchestrator::new(&cloud, plan(&fixture.config));

    let certificates = orchestrator.deploy_stack("CertificateStack").await.unwrap();
    orchestrator.deploy_stack("EdgeFunctionStack").await.unwrap();

    // Point the identity key at the site certificate, which lacks auth.example.com
    let exchange = ParameterExchange::new(&cloud, Scope::new(ACCOUNT, "us-east-1"));
    exchange
        .put(
            "us-east-1",
            "CognitoCertArn",
            &certificates.outputs["SiteCertificateArn"],
        )
        .await
        .unwrap();

    let err = orchestrator.deploy_stack("WebsiteStack").await.unwrap_err();
    assert!(matches!(err, DeployError::Configuration(_)));
    assert!(err.to_string().contains("auth.example.com"));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_foreign_record_conflict_fails_deploy() {
    let fixture = fixture("www", ACCOUNT);
    let cloud = SimulatedCloud::new();
    let zone = cloud.register_zone("example.com", true).await;

    cloud
        .upsert_record(
            &zone.id,
            "LegacyStack",
            &RecordSpec {
                name: "www.example.com".to_string(),
                record_type: RecordType::CNAME,
                target: RecordTarget::Value("legacy.example.net".to_string()),
                comment: None,
            },
        )
        .await
        .unwrap();

    let err = deploy_all(&cloud, &fixture.config).await.unwrap_err();

    assert!(matches!(err, DeployError::Conflict(_)));
    assert!(err.to_string().contains("legacy.example.net"));

    let records = cloud.list_records(&zone.id).await.unwrap();
    let www = records
        .iter()
        .find(|r| r.name == "www.example.com")
        .unwrap();
    assert_eq!(www.owner.as_deref(), Some("LegacyStack"));
}

#[tokio::test]
async fn test_cross_account_reads_need_trust() {
    let fixture = fixture("www", "222222222222");

    let untrusted = cloud_with_zone().await;
    let err = deploy_all(&untrusted, &fixture.config).await.unwrap_err();
    assert!(matches!(err, DeployError::AccessDenied(_)));

    let trusted = cloud_with_zone().await;
    trusted.trust_account("222222222222").await;
    deploy_all(&trusted, &fixture.config).await.unwrap();
}

#[tokio::test]
async fn test_changing_alternates_replaces_certificate_and_republishes() {
    let cloud = cloud_with_zone().await;

    let before = fixture("www", ACCOUNT);
    let first = deploy_all(&cloud, &before.config).await.unwrap();

    let after = fixture("www,shop", ACCOUNT);
    let second = deploy_all(&cloud, &after.config).await.unwrap();

    let certificate_action = second.reports[0]
        .changes
        .iter()
        .find(|c| c.logical_id == "WebsiteSSLCertificate")
        .map(|c| c.action);
    assert_eq!(certificate_action, Some(ResourceAction::Replaced));

    let published = &second.reports[0].published[0];
    assert_eq!(published.name, "example.com-SSLCertificate");
    assert_eq!(published.version, 2);
    assert!(published.changed);

    assert_ne!(
        first.reports[0].outputs["SiteCertificateArn"],
        second.reports[0].outputs["SiteCertificateArn"]
    );
    let config = distribution_config(&cloud).await;
    assert!(config.aliases.contains(&"shop.example.com".to_string()));
    assert_eq!(
        config.viewer_certificate.certificate_arn,
        second.reports[0].outputs["SiteCertificateArn"]
    );
}

#[test]
fn test_plan_orders_website_last() {
    let fixture = fixture("www", ACCOUNT);
    let plan = plan(&fixture.config);
    assert_eq!(plan.order().last(), Some(&"WebsiteStack"));

    let website = plan.stack("WebsiteStack").unwrap();
    assert_eq!(
        plan.producer_scopes(website)
            .values()
            .map(|s| s.region.as_str())
            .collect::<Vec<_>>(),
        vec!["us-east-1"; 4]
    );
}
