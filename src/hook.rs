//! Hook protocol surface: the capability query and the OnDefineDomain mutation.

use facet::Facet;

use crate::annotations::extract_annotations;
use crate::domain_xml::DomainDocument;
use crate::error::HookError;
use crate::rules::RuleTable;

/// Hook protocol version this sidecar speaks.
pub const SUPPORTED_VERSION: &str = "v1alpha1";

/// Name of the domain-definition hook point.
pub const ON_DEFINE_DOMAIN: &str = "OnDefineDomain";

// ── Roam service definition ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct HookPoint {
    pub name: String,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct InfoResult {
    pub name: String,
    pub versions: Vec<String>,
    pub hook_points: Vec<HookPoint>,
}

#[derive(Debug, Clone, Facet)]
pub struct OnDefineDomainResult {
    pub domain_xml: Vec<u8>,
}

#[roam::service]
pub trait HookService {
    async fn info(&self) -> Result<InfoResult, String>;
    async fn on_define_domain(
        &self,
        vmi: Vec<u8>,
        domain_xml: Vec<u8>,
    ) -> Result<OnDefineDomainResult, String>;
}

// ── operations ──────────────────────────────────────────────────────

/// The fixed capability descriptor for a hook called `name`.
pub fn info(name: &str) -> InfoResult {
    InfoResult {
        name: name.to_string(),
        versions: vec![SUPPORTED_VERSION.to_string()],
        hook_points: vec![HookPoint {
            name: ON_DEFINE_DOMAIN.to_string(),
            priority: 0,
        }],
    }
}

/// Run the rule set over a domain document using the VMI's annotations and
/// return the encoded result.
pub fn on_define_domain(
    rules: &RuleTable,
    vmi: &[u8],
    domain_xml: &[u8],
) -> Result<Vec<u8>, HookError> {
    let annotations = extract_annotations(vmi).inspect_err(|e| {
        tracing::error!(vmi = %String::from_utf8_lossy(vmi), "{e}");
    })?;

    let doc = DomainDocument::decode(domain_xml).inspect_err(|e| {
        tracing::error!(domain_xml = %String::from_utf8_lossy(domain_xml), "{e}");
    })?;

    let doc = rules.apply(&annotations, doc)?;
    let encoded = doc.encode().inspect_err(|e| tracing::error!("{e}"))?;

    tracing::info!("updated domain spec with requested attributes");
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_is_constant() {
        let first = info("android-x86");
        let second = info("android-x86");
        assert_eq!(first, second);
        assert_eq!(first.name, "android-x86");
        assert_eq!(first.versions, vec!["v1alpha1".to_string()]);
        assert_eq!(
            first.hook_points,
            vec![HookPoint {
                name: "OnDefineDomain".into(),
                priority: 0
            }]
        );
    }

    #[test]
    fn malformed_payloads_are_fatal() {
        let rules = RuleTable::for_platform("kubevirt.io");

        let err = on_define_domain(&rules, b"nope", b"<domain/>").unwrap_err();
        assert!(matches!(err, HookError::DescriptorDecode { .. }));
        assert!(err.is_fatal());

        let err = on_define_domain(&rules, b"{}", b"<domain>").unwrap_err();
        assert!(matches!(err, HookError::DocumentDecode { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn descriptor_is_decoded_before_document() {
        let rules = RuleTable::for_platform("kubevirt.io");
        let err = on_define_domain(&rules, b"nope", b"also nope").unwrap_err();
        assert!(matches!(err, HookError::DescriptorDecode { .. }));
    }
}
