//! Annotation-driven rewrite rules for the domain document.
//!
//! Each [`Rule`] is gated by one annotation key. A [`RuleTable`] maps rules to
//! their keys and applies every rule whose key is present, always in
//! [`Rule::ALL`] order, each rule seeing the result of the previous one.

use std::collections::BTreeMap;

use facet_value::Value;

use crate::annotations::Annotations;
use crate::domain_xml::{
    BaseBoard, DomainDocument, EGL_HEADLESS, Hostdev, MdevSubsystem, PciAddress,
};
use crate::error::HookError;

/// PCI slot used for the mediated GPU. There is no address allocator, so only
/// one vGPU per domain is supported.
pub const VGPU_PCI_ADDRESS: PciAddress = PciAddress {
    domain: 0x0000,
    bus: 0x00,
    slot: 0x05,
    function: 0x0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rule {
    BaseBoardManufacturer,
    VideoModel,
    EglHeadless,
    Vgpu,
    QemuArgs,
}

impl Rule {
    /// Every rule, in application order.
    pub const ALL: [Rule; 5] = [
        Rule::BaseBoardManufacturer,
        Rule::VideoModel,
        Rule::EglHeadless,
        Rule::Vgpu,
        Rule::QemuArgs,
    ];

    /// Full annotation key for this rule under `platform` (e.g. `kubevirt.io`).
    pub fn annotation_key(self, platform: &str) -> String {
        let (group, attribute) = match self {
            Rule::BaseBoardManufacturer => ("smbios", "baseBoardManufacturer"),
            Rule::VideoModel => ("video", "model"),
            Rule::EglHeadless => ("graphics", "eglHeadless"),
            Rule::Vgpu => ("video", "vgpu"),
            Rule::QemuArgs => ("qemu", "args"),
        };
        format!("{group}.vm.{platform}/{attribute}")
    }

    /// Apply this rule with the annotation `value` and return the rewritten document.
    pub fn apply(self, doc: DomainDocument, value: &str) -> Result<DomainDocument, HookError> {
        match self {
            Rule::BaseBoardManufacturer => base_board_manufacturer(doc, value),
            Rule::VideoModel => Ok(video_model(doc, value)),
            Rule::EglHeadless => egl_headless(doc),
            Rule::Vgpu => vgpu(doc, value),
            Rule::QemuArgs => Ok(qemu_args(doc, value)),
        }
    }
}

fn base_board_manufacturer(
    mut doc: DomainDocument,
    manufacturer: &str,
) -> Result<DomainDocument, HookError> {
    tracing::info!(manufacturer, "configuring the baseboard manufacturer");
    doc.set_smbios_mode("sysinfo")?;
    doc.set_sysinfo_type("smbios");
    doc.push_base_board(&BaseBoard {
        entries: vec![("manufacturer".into(), manufacturer.into())],
    });
    Ok(doc)
}

fn video_model(mut doc: DomainDocument, model: &str) -> DomainDocument {
    tracing::info!(model, "configuring the video model");
    doc.set_first_video_model(model);
    doc
}

fn egl_headless(mut doc: DomainDocument) -> Result<DomainDocument, HookError> {
    tracing::info!("configuring egl-headless graphics");
    doc.push_graphics(EGL_HEADLESS)?;
    Ok(doc)
}

fn vgpu(mut doc: DomainDocument, uuid: &str) -> Result<DomainDocument, HookError> {
    tracing::info!(uuid, "configuring a vGPU");
    doc.push_hostdev(&Hostdev {
        managed: false,
        mdev: Some(MdevSubsystem {
            model: "vfio-pci".into(),
            display: true,
            uuid: uuid.into(),
        }),
        address: Some(VGPU_PCI_ADDRESS),
    })?;
    Ok(doc)
}

/// Decode the qemu args annotation: a JSON array of strings.
///
/// Elements of any other JSON type are rejected rather than stringified.
pub fn decode_qemu_args(value: &str) -> Result<Vec<String>, HookError> {
    let invalid = |message: String| HookError::QemuArgsDecode {
        value: value.to_string(),
        message,
    };
    let parsed: Value = facet_json::from_str(value).map_err(|e| invalid(e.to_string()))?;
    let items = parsed
        .as_array()
        .ok_or_else(|| invalid("expected a JSON array".into()))?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_string()
                .map(|s| s.as_str().to_string())
                .ok_or_else(|| invalid(format!("element {i} is not a string")))
        })
        .collect()
}

fn qemu_args(mut doc: DomainDocument, value: &str) -> DomainDocument {
    tracing::info!(value, "configuring additional qemu arguments");
    match decode_qemu_args(value) {
        Ok(args) => {
            for arg in &args {
                tracing::debug!(arg = %arg, "adding qemu argument");
            }
            doc.push_qemu_args(&args);
        }
        Err(e) => tracing::error!("{e}; ignoring the qemu arguments"),
    }
    doc
}

// ── RuleTable ─────────────────────────────────────────────

/// Mapping from rule to the annotation key that enables it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTable {
    keys: BTreeMap<Rule, String>,
}

impl RuleTable {
    pub fn new(keys: BTreeMap<Rule, String>) -> Self {
        Self { keys }
    }

    /// All five rules keyed under `platform`, e.g. `video.vm.kubevirt.io/model`.
    pub fn for_platform(platform: &str) -> Self {
        Self::new(
            Rule::ALL
                .into_iter()
                .map(|rule| (rule, rule.annotation_key(platform)))
                .collect(),
        )
    }

    pub fn key(&self, rule: Rule) -> Option<&str> {
        self.keys.get(&rule).map(String::as_str)
    }

    /// Apply every rule whose annotation is present.
    ///
    /// Errors are fatal for the call; a malformed qemu args value is logged and
    /// skipped inside the rule and never surfaces here.
    pub fn apply(
        &self,
        annotations: &Annotations,
        mut doc: DomainDocument,
    ) -> Result<DomainDocument, HookError> {
        for (rule, key) in &self.keys {
            match annotations.get(key) {
                Some(value) => doc = rule.apply(doc, value)?,
                None => tracing::info!(key = %key, "annotation not provided, skipping {rule:?}"),
            }
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(xml: &str) -> DomainDocument {
        DomainDocument::parse(xml).unwrap()
    }

    fn annotations(pairs: &[(&str, &str)]) -> Annotations {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn keys_follow_platform() {
        let table = RuleTable::for_platform("kubevirt.io");
        assert_eq!(
            table.key(Rule::BaseBoardManufacturer),
            Some("smbios.vm.kubevirt.io/baseBoardManufacturer")
        );
        assert_eq!(table.key(Rule::VideoModel), Some("video.vm.kubevirt.io/model"));
        assert_eq!(table.key(Rule::Vgpu), Some("video.vm.kubevirt.io/vgpu"));
        assert_eq!(
            table.key(Rule::EglHeadless),
            Some("graphics.vm.kubevirt.io/eglHeadless")
        );
        assert_eq!(table.key(Rule::QemuArgs), Some("qemu.vm.kubevirt.io/args"));
    }

    #[test]
    fn base_board_is_appended_not_merged() {
        let input = doc(
            r#"<domain><sysinfo type="smbios"><baseBoard><entry name="product">X</entry></baseBoard></sysinfo></domain>"#,
        );
        let out = Rule::BaseBoardManufacturer.apply(input, "Acme").unwrap();
        let boards = out.base_boards();
        assert_eq!(boards.len(), 2);
        assert_eq!(
            boards[1].entries,
            vec![("manufacturer".to_string(), "Acme".to_string())]
        );
    }

    #[test]
    fn video_model_adds_device_only_when_missing() {
        let out = Rule::VideoModel.apply(doc("<domain/>"), "virtio").unwrap();
        assert_eq!(out.video_models(), vec![Some("virtio".to_string())]);

        let input = doc(
            r#"<domain><devices><video><model type="vga"/></video><video><model type="qxl"/></video></devices></domain>"#,
        );
        let out = Rule::VideoModel.apply(input, "virtio").unwrap();
        assert_eq!(
            out.video_models(),
            vec![Some("virtio".to_string()), Some("qxl".to_string())]
        );
    }

    #[test]
    fn egl_headless_ignores_value() {
        let out = Rule::EglHeadless.apply(doc("<domain/>"), "false").unwrap();
        assert_eq!(out.graphics_types(), vec![EGL_HEADLESS.to_string()]);
    }

    #[test]
    fn vgpu_uses_fixed_address() {
        let out = Rule::Vgpu.apply(doc("<domain/>"), "abc").unwrap();
        let hostdevs = out.hostdevs();
        assert_eq!(hostdevs.len(), 1);
        assert!(!hostdevs[0].managed);
        assert_eq!(hostdevs[0].address, Some(VGPU_PCI_ADDRESS));
        let mdev = hostdevs[0].mdev.as_ref().unwrap();
        assert_eq!(mdev.model, "vfio-pci");
        assert!(mdev.display);
        assert_eq!(mdev.uuid, "abc");
    }

    #[test]
    fn qemu_args_decode() {
        assert_eq!(
            decode_qemu_args(r#"["-foo","-bar"]"#).unwrap(),
            vec!["-foo".to_string(), "-bar".to_string()]
        );
        assert!(decode_qemu_args("-foo").is_err());
        assert!(decode_qemu_args(r#"{"a":1}"#).is_err());
        assert!(decode_qemu_args("[1,2]").is_err());
        assert!(decode_qemu_args(r#"["-foo",null]"#).is_err());
        assert!(decode_qemu_args(r#"["-foo",["-bar"]]"#).is_err());
        assert!(decode_qemu_args(r#""-foo""#).is_err());
        assert_eq!(decode_qemu_args("[]").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn malformed_qemu_args_leave_document_unchanged() {
        let input = doc("<domain><name>vm</name></domain>");
        let out = Rule::QemuArgs.apply(input.clone(), "not json").unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn empty_value_still_counts_as_present() {
        let table = RuleTable::for_platform("kubevirt.io");
        let out = table
            .apply(
                &annotations(&[("video.vm.kubevirt.io/model", "")]),
                doc("<domain/>"),
            )
            .unwrap();
        assert_eq!(out.video_models(), vec![Some(String::new())]);
    }

    #[test]
    fn table_without_rule_never_fires() {
        let mut keys = BTreeMap::new();
        keys.insert(Rule::EglHeadless, "custom/headless".to_string());
        let table = RuleTable::new(keys);

        let out = table
            .apply(
                &annotations(&[
                    ("custom/headless", ""),
                    ("video.vm.kubevirt.io/model", "virtio"),
                ]),
                doc("<domain/>"),
            )
            .unwrap();
        assert_eq!(out.graphics_types(), vec![EGL_HEADLESS.to_string()]);
        assert!(out.video_models().is_empty());
        assert_eq!(table.key(Rule::VideoModel), None);
    }

    #[test]
    fn no_annotations_is_identity() {
        let input = doc(r#"<domain type="kvm"><devices><video/></devices></domain>"#);
        let out = RuleTable::for_platform("kubevirt.io")
            .apply(&Annotations::new(), input.clone())
            .unwrap();
        assert_eq!(out, input);
    }
}
