//! Libvirt domain document: a lossless tree with typed access to the nodes
//! the hook reads and writes.

pub mod fragments;
pub mod tree;

use tree::Element;

use crate::error::HookError;

/// Namespace of the libvirt QEMU command-line passthrough elements.
pub const QEMU_NAMESPACE: &str = "http://libvirt.org/schemas/domain/qemu/1.0";

/// Graphics type of the headless EGL remote-rendering transport.
pub const EGL_HEADLESS: &str = "egl-headless";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PciAddress {
    pub domain: u16,
    pub bus: u8,
    pub slot: u8,
    pub function: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdevSubsystem {
    pub model: String,
    pub display: bool,
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hostdev {
    pub managed: bool,
    /// Present when the device is a mediated (`type="mdev"`) subsystem device.
    pub mdev: Option<MdevSubsystem>,
    pub address: Option<PciAddress>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseBoard {
    pub entries: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDocument {
    root: Element,
}

impl DomainDocument {
    /// Decode a domain XML payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, HookError> {
        let text = std::str::from_utf8(bytes).map_err(|e| HookError::DocumentDecode {
            message: e.to_string(),
        })?;
        Self::parse(text)
    }

    pub fn parse(xml: &str) -> Result<Self, HookError> {
        let root = tree::parse(xml)?;
        if root.name != "domain" {
            return Err(HookError::DocumentDecode {
                message: format!("root element is <{}>, expected <domain>", root.name),
            });
        }
        Ok(Self { root })
    }

    pub fn encode(&self) -> Result<Vec<u8>, HookError> {
        Ok(self.to_xml()?.into_bytes())
    }

    pub fn to_xml(&self) -> Result<String, HookError> {
        tree::write(&self.root)
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    // ── typed views ────────────────────────────────────────

    /// `/domain/os/smbios/@mode`
    pub fn smbios_mode(&self) -> Option<&str> {
        self.root.child("os")?.child("smbios")?.attr("mode")
    }

    /// `/domain/sysinfo/@type`
    pub fn sysinfo_type(&self) -> Option<&str> {
        self.root.child("sysinfo")?.attr("type")
    }

    pub fn base_boards(&self) -> Vec<BaseBoard> {
        let Some(sysinfo) = self.root.child("sysinfo") else {
            return Vec::new();
        };
        sysinfo
            .children_named("baseBoard")
            .map(|board| BaseBoard {
                entries: board
                    .children_named("entry")
                    .map(|e| (e.attr("name").unwrap_or_default().to_string(), e.text()))
                    .collect(),
            })
            .collect()
    }

    /// Model type of each `<video>` device, in document order.
    pub fn video_models(&self) -> Vec<Option<String>> {
        self.devices()
            .map(|d| {
                d.children_named("video")
                    .map(|v| v.child("model").and_then(|m| m.attr("type")).map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Type of each `<graphics>` device, in document order.
    pub fn graphics_types(&self) -> Vec<String> {
        self.devices()
            .map(|d| {
                d.children_named("graphics")
                    .map(|g| g.attr("type").unwrap_or_default().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn hostdevs(&self) -> Vec<Hostdev> {
        self.devices()
            .map(|d| d.children_named("hostdev").map(hostdev_view).collect())
            .unwrap_or_default()
    }

    /// Arguments of the QEMU command-line block, or `None` when the block is absent.
    pub fn qemu_args(&self) -> Option<Vec<String>> {
        let prefix = self.qemu_prefix()?;
        let commandline = self.root.child(&format!("{prefix}:commandline"))?;
        let arg = format!("{prefix}:arg");
        Some(
            commandline
                .children_named(&arg)
                .map(|a| a.attr("value").unwrap_or_default().to_string())
                .collect(),
        )
    }

    fn devices(&self) -> Option<&Element> {
        self.root.child("devices")
    }

    /// Prefix bound to [`QEMU_NAMESPACE`] on the root element.
    fn qemu_prefix(&self) -> Option<&str> {
        self.root
            .attributes
            .iter()
            .find_map(|(k, v)| k.strip_prefix("xmlns:").filter(|_| v == QEMU_NAMESPACE))
    }

    // ── edits ──────────────────────────────────────────────

    /// Replace `/domain/os/smbios` with `<smbios mode="..."/>`, creating `<os>` if needed.
    pub fn set_smbios_mode(&mut self, mode: &str) -> Result<(), HookError> {
        let smbios = fragments::smbios(mode)?;
        let os = self.root.ensure_child("os");
        os.remove_children("smbios");
        os.push(smbios);
        Ok(())
    }

    /// Set `/domain/sysinfo/@type`, creating `<sysinfo>` if needed.
    pub fn set_sysinfo_type(&mut self, kind: &str) {
        self.root.ensure_child("sysinfo").set_attr("type", kind);
    }

    /// Append a `<baseBoard>` to `<sysinfo>`, alongside any existing ones.
    pub fn push_base_board(&mut self, board: &BaseBoard) {
        let mut element = Element::new("baseBoard");
        for (name, value) in &board.entries {
            element.push(Element::new("entry").with_attr("name", name).with_text(value));
        }
        self.root.ensure_child("sysinfo").push(element);
    }

    /// Set the model type of the first `<video>`, adding an empty video device if none exist.
    /// Other `<model>` attributes are kept.
    pub fn set_first_video_model(&mut self, model: &str) {
        let devices = self.root.ensure_child("devices");
        devices
            .ensure_child("video")
            .ensure_child("model")
            .set_attr("type", model);
    }

    pub fn push_graphics(&mut self, kind: &str) -> Result<(), HookError> {
        let graphics = fragments::graphics(kind)?;
        self.root.ensure_child("devices").push(graphics);
        Ok(())
    }

    pub fn push_hostdev(&mut self, hostdev: &Hostdev) -> Result<(), HookError> {
        let element = hostdev.to_element()?;
        self.root.ensure_child("devices").push(element);
        Ok(())
    }

    /// Append arguments to the QEMU command-line block, declaring the namespace
    /// and creating the block when missing.
    pub fn push_qemu_args(&mut self, args: &[String]) {
        let prefix = match self.qemu_prefix() {
            Some(p) => p.to_string(),
            None => self.declare_qemu_namespace(),
        };
        let arg = format!("{prefix}:arg");
        let commandline = self.root.ensure_child(&format!("{prefix}:commandline"));
        for value in args {
            commandline.push(Element::new(arg.as_str()).with_attr("value", value));
        }
    }

    fn declare_qemu_namespace(&mut self) -> String {
        let mut prefix = "qemu".to_string();
        let mut n = 0;
        while self.root.attr(&format!("xmlns:{prefix}")).is_some() {
            n += 1;
            prefix = format!("qemu{n}");
        }
        self.root.set_attr(&format!("xmlns:{prefix}"), QEMU_NAMESPACE);
        prefix
    }
}

fn parse_pci_number(value: &str) -> Option<u32> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn pci_address_view(address: &Element) -> Option<PciAddress> {
    if address.attr("type") != Some("pci") {
        return None;
    }
    let field = |name: &str| address.attr(name).and_then(parse_pci_number);
    Some(PciAddress {
        domain: u16::try_from(field("domain").unwrap_or(0)).ok()?,
        bus: u8::try_from(field("bus").unwrap_or(0)).ok()?,
        slot: u8::try_from(field("slot").unwrap_or(0)).ok()?,
        function: u8::try_from(field("function").unwrap_or(0)).ok()?,
    })
}

fn hostdev_view(hostdev: &Element) -> Hostdev {
    let mdev = (hostdev.attr("type") == Some("mdev")).then(|| MdevSubsystem {
        model: hostdev.attr("model").unwrap_or_default().to_string(),
        display: hostdev.attr("display") == Some("on"),
        uuid: hostdev
            .child("source")
            .and_then(|s| s.child("address"))
            .and_then(|a| a.attr("uuid"))
            .unwrap_or_default()
            .to_string(),
    });
    Hostdev {
        managed: hostdev.attr("managed") == Some("yes"),
        mdev,
        address: hostdev.child("address").and_then(pci_address_view),
    }
}
