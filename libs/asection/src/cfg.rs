//! Section and repeater configuration as handed over by template code.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use kstring::KString;
use serde::Deserialize;
use serde_json::Value;

/// A macro of the current template, with its arguments.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MacroCall {
    pub name: KString,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl MacroCall {
    pub fn new(name: &str) -> Self {
        MacroCall { name: KString::from_ref(name), args: Vec::new() }
    }

    pub fn with_args(name: &str, args: Vec<Value>) -> Self {
        MacroCall { name: KString::from_ref(name), args }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SectionCfg {
    #[serde(default)]
    pub id: Option<KString>,
    /// Tag name of the wrapping element. Sections without one don't
    /// write any markup of their own.
    #[serde(default, rename = "type")]
    pub type_: Option<KString>,
    #[serde(default)]
    pub attributes: BTreeMap<KString, KString>,
    /// Called to produce the content when the section is opened.
    #[serde(default, rename = "macro")]
    pub macro_: Option<MacroCall>,
}

impl SectionCfg {
    pub fn with_id(id: &str) -> Self {
        SectionCfg {
            id: Some(KString::from_ref(id)),
            ..Default::default()
        }
    }

    pub fn tag(mut self, type_: &str) -> Self {
        self.type_ = Some(KString::from_ref(type_));
        self
    }

    pub fn attribute(mut self, key: &str, val: &str) -> Self {
        self.attributes.insert(KString::from_ref(key), KString::from_ref(val));
        self
    }

    pub fn macro_call(mut self, m: MacroCall) -> Self {
        self.macro_ = Some(m);
        self
    }
}

/// How each item of a repeater is turned into a child section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChildSectionsCfg {
    #[serde(default, rename = "type")]
    pub type_: Option<KString>,
    #[serde(default)]
    pub attributes: BTreeMap<KString, KString>,
    /// Called with `[item, key]` for every item.
    #[serde(rename = "macro")]
    pub macro_: KString,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RepeaterCfg {
    #[serde(default)]
    pub id: Option<KString>,
    /// An array or an object; anything else is rejected.
    #[serde(default)]
    pub content: Value,
    #[serde(rename = "childSections")]
    pub child_sections: ChildSectionsCfg,
}

impl RepeaterCfg {
    pub fn new(id: &str, content: Value, child_macro: &str) -> Self {
        RepeaterCfg {
            id: Some(KString::from_ref(id)),
            content,
            child_sections: ChildSectionsCfg {
                type_: None,
                attributes: BTreeMap::new(),
                macro_: KString::from_ref(child_macro),
            }
        }
    }

    pub fn child_tag(mut self, type_: &str) -> Self {
        self.child_sections.type_ = Some(KString::from_ref(type_));
        self
    }
}

/// The parameters of `begin_section` or `repeater`; the variant picks
/// the kind of node that gets constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionParams {
    Section(SectionCfg),
    Repeater(RepeaterCfg),
}

impl SectionParams {
    pub fn id(&self) -> Option<&KString> {
        match self {
            SectionParams::Section(cfg) => cfg.id.as_ref(),
            SectionParams::Repeater(cfg) => cfg.id.as_ref(),
        }
    }

    /// Check the parts of the configuration that don't depend on the
    /// tree the section would end up in.
    pub fn check(&self) -> Result<()> {
        if let Some(id) = self.id() {
            check_id(id)?;
        }
        match self {
            SectionParams::Section(cfg) => {
                if let Some(t) = &cfg.type_ {
                    check_tag(t)?;
                }
                for key in cfg.attributes.keys() {
                    check_attribute_name(key)?;
                }
            }
            SectionParams::Repeater(cfg) => {
                if cfg.id.is_none() {
                    bail!("a repeater needs an id")
                }
                match &cfg.content {
                    Value::Array(_) | Value::Object(_) => (),
                    other => bail!("repeater content must be an array or an \
                                    object, got {other}")
                }
                if let Some(t) = &cfg.child_sections.type_ {
                    check_tag(t)?;
                }
                for key in cfg.child_sections.attributes.keys() {
                    check_attribute_name(key)?;
                }
            }
        }
        Ok(())
    }
}

fn check_id(id: &str) -> Result<()> {
    if id.is_empty() {
        bail!("section id must not be empty")
    }
    if let Some(c) = id.chars().find(
        |c| *c == '+' || *c == '"' || *c == '\'' || c.is_whitespace())
    {
        bail!("invalid character {c:?} in section id {id:?}")
    }
    Ok(())
}

fn check_tag(tag: &str) -> Result<()> {
    if tag.is_empty() || ! tag.chars().all(|c| c.is_ascii_alphanumeric()) {
        bail!("invalid element name {tag:?}")
    }
    Ok(())
}

fn check_attribute_name(name: &str) -> Result<()> {
    if name.is_empty()
        || ! name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("invalid attribute name {name:?}")
    }
    if name == "id" {
        bail!("the id attribute is set from the section id")
    }
    Ok(())
}
