//! Fixed device fragments, rendered with facet-xml struct serialization and
//! grafted into the document tree.

use facet::Facet;
use facet_xml as xml;

use super::tree::{self, Element};
use super::{Hostdev, PciAddress};
use crate::error::HookError;

// ── XML model structs ──────────────────────────────────────

#[derive(Debug, Facet)]
#[facet(rename = "smbios")]
struct SmbiosXml {
    #[facet(xml::attribute)]
    mode: String,
}

#[derive(Debug, Facet)]
#[facet(rename = "graphics")]
struct GraphicsXml {
    #[facet(xml::attribute, rename = "type")]
    kind: String,
}

#[derive(Debug, Facet)]
#[facet(rename = "hostdev")]
struct MdevHostdevXml {
    #[facet(xml::attribute)]
    mode: String,
    #[facet(xml::attribute, rename = "type")]
    kind: String,
    #[facet(xml::attribute)]
    managed: String,
    #[facet(xml::attribute)]
    model: String,
    #[facet(xml::attribute)]
    display: String,
    source: MdevSourceXml,
    address: PciAddressXml,
}

#[derive(Debug, Facet)]
struct MdevSourceXml {
    address: MdevAddressXml,
}

#[derive(Debug, Facet)]
struct MdevAddressXml {
    #[facet(xml::attribute)]
    uuid: String,
}

#[derive(Debug, Facet)]
struct PciAddressXml {
    #[facet(xml::attribute, rename = "type")]
    kind: String,
    #[facet(xml::attribute)]
    domain: String,
    #[facet(xml::attribute)]
    bus: String,
    #[facet(xml::attribute)]
    slot: String,
    #[facet(xml::attribute)]
    function: String,
}

// ── rendering ──────────────────────────────────────────────

fn graft<'a, T: Facet<'a>>(fragment: &T) -> Result<Element, HookError> {
    let rendered = facet_xml::to_string(fragment).map_err(|e| HookError::DocumentEncode {
        message: format!("rendering device fragment: {e}"),
    })?;
    let mut element = tree::parse(&rendered).map_err(|e| HookError::DocumentEncode {
        message: format!("re-reading device fragment: {e}"),
    })?;
    element.forget_source();
    Ok(element)
}

fn on_off(flag: bool) -> String {
    if flag { "on" } else { "off" }.to_string()
}

fn yes_no(flag: bool) -> String {
    if flag { "yes" } else { "no" }.to_string()
}

/// `<smbios mode="..."/>`
pub fn smbios(mode: &str) -> Result<Element, HookError> {
    graft(&SmbiosXml { mode: mode.into() })
}

/// `<graphics type="..."/>`
pub fn graphics(kind: &str) -> Result<Element, HookError> {
    graft(&GraphicsXml { kind: kind.into() })
}

/// `<hostdev mode="subsystem" type="mdev" ...>` with its mdev source and PCI address.
pub fn mdev_hostdev(
    managed: bool,
    model: &str,
    display: bool,
    uuid: &str,
    address: PciAddress,
) -> Result<Element, HookError> {
    graft(&MdevHostdevXml {
        mode: "subsystem".into(),
        kind: "mdev".into(),
        managed: yes_no(managed),
        model: model.into(),
        display: on_off(display),
        source: MdevSourceXml {
            address: MdevAddressXml { uuid: uuid.into() },
        },
        address: pci_address(address),
    })
}

fn pci_address(address: PciAddress) -> PciAddressXml {
    PciAddressXml {
        kind: "pci".into(),
        domain: format!("0x{:04x}", address.domain),
        bus: format!("0x{:02x}", address.bus),
        slot: format!("0x{:02x}", address.slot),
        function: format!("0x{:x}", address.function),
    }
}

impl Hostdev {
    /// Render a typed mdev host device. Only mdev devices carry a fixed fragment.
    pub(crate) fn to_element(&self) -> Result<Element, HookError> {
        let mdev = self.mdev.as_ref().ok_or_else(|| HookError::DocumentEncode {
            message: "only mediated host devices can be rendered".into(),
        })?;
        mdev_hostdev(
            self.managed,
            &mdev.model,
            mdev.display,
            &mdev.uuid,
            self.address.unwrap_or_default(),
        )
    }
}
