use std::{collections::HashMap,
          fmt,
          sync::Mutex};

use anyhow::Result;
use kstring::KString;
use lazy_static::lazy_static;
use serde_json::Value;

use crate::{cfg::{ChildSectionsCfg, MacroCall, SectionCfg, SectionParams},
            delegate::{Callback, DelegateId, DelegateRegistry},
            escape::html_escape_into};


/// Interactive behavior of a widget rendered inside a section; it is
/// initialized once the markup is in the document and disposed
/// together with its section.
pub trait Behavior: fmt::Debug {
    fn name(&self) -> &str;

    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn dispose(&mut self) {}
}


lazy_static!{
    static ref NEXT_TREE_ID: Mutex<u32> = Mutex::new(0);
}
fn next_tree_id() -> u32 {
    let mut guard = NEXT_TREE_ID.lock().unwrap();
    let id = *guard;
    *guard = id.wrapping_add(1);
    id
}

/// Reference to a node in a `SectionTree`. Only valid for the tree
/// that issued it, using it with another tree panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SId {
    tree_id: u32,
    index: u32,
}

#[derive(Debug)]
pub enum SectionKind {
    Section {
        type_: Option<KString>,
        attributes: Vec<(KString, KString)>,
        macro_: Option<MacroCall>,
    },
    Repeater {
        content: Value,
        child_sections: ChildSectionsCfg,
    },
}

/// What a section contributes between its begin and end markup, to
/// be carried out by the writer.
#[derive(Debug, PartialEq)]
pub enum Content {
    /// Content comes from the template code surrounding the section.
    Inline,
    Macro(MacroCall),
    /// One child section per repeater item.
    Items(Vec<SectionCfg>),
}

pub struct SectionNode {
    id: Option<KString>,
    dom_id: Option<KString>,
    is_root: bool,
    kind: SectionKind,
    parent: Option<SId>,
    children: Vec<SId>,
    behaviors: Vec<Box<dyn Behavior>>,
    delegate_ids: Vec<DelegateId>,
    delegate_callbacks: Vec<Callback>,
    html: Option<String>,
    invalid: Option<String>,
}

impl fmt::Debug for SectionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionNode")
            .field("id", &self.id)
            .field("is_root", &self.is_root)
            .field("kind", &self.kind)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("behaviors", &self.behaviors)
            .field("delegate_ids", &self.delegate_ids)
            .field("delegate_callbacks", &self.delegate_callbacks.len())
            .field("invalid", &self.invalid)
            .finish()
    }
}

impl SectionNode {
    pub fn id(&self) -> Option<&str> { self.id.as_deref() }
    pub fn dom_id(&self) -> Option<&str> { self.dom_id.as_deref() }
    pub fn is_root(&self) -> bool { self.is_root }
    pub fn kind(&self) -> &SectionKind { &self.kind }
    pub fn parent(&self) -> Option<SId> { self.parent }
    pub fn children(&self) -> &[SId] { &self.children }
    pub fn behaviors(&self) -> &[Box<dyn Behavior>] { &self.behaviors }
    pub fn delegate_ids(&self) -> &[DelegateId] { &self.delegate_ids }
    pub fn delegate_callbacks(&self) -> &[Callback] { &self.delegate_callbacks }
    pub fn html(&self) -> Option<&str> { self.html.as_deref() }
    pub fn is_valid(&self) -> bool { self.invalid.is_none() }
    pub fn invalid_reason(&self) -> Option<&str> { self.invalid.as_deref() }

    pub fn is_repeater(&self) -> bool {
        matches!(self.kind, SectionKind::Repeater { .. })
    }

    pub fn add_behavior(&mut self, bhv: Box<dyn Behavior>) {
        self.behaviors.push(bhv);
    }

    pub fn add_delegate_id(&mut self, id: DelegateId) {
        self.delegate_ids.push(id);
    }

    pub fn add_delegate_callback(&mut self, cb: Callback) {
        self.delegate_callbacks.push(cb);
    }

    pub fn set_html(&mut self, html: String) {
        self.html = Some(html);
    }

    fn wrapper_tag(&self) -> Option<&KString> {
        match &self.kind {
            SectionKind::Section { type_, .. } => type_.as_ref(),
            // Repeater items carry the wrappers, not the repeater.
            SectionKind::Repeater { .. } => None,
        }
    }

    /// Opening tag of the wrapping element, if the section has one.
    pub fn begin_markup(&self) -> Option<String> {
        let tag = self.wrapper_tag()?;
        let mut s = String::new();
        s.push('<');
        s.push_str(tag);
        if let Some(dom_id) = &self.dom_id {
            s.push_str(" id=\"");
            html_escape_into(&mut s, dom_id);
            s.push('"');
        }
        if let SectionKind::Section { attributes, .. } = &self.kind {
            for (key, val) in attributes {
                s.push(' ');
                s.push_str(key);
                s.push_str("=\"");
                html_escape_into(&mut s, val);
                s.push('"');
            }
        }
        s.push('>');
        Some(s)
    }

    pub fn content(&self) -> Content {
        match &self.kind {
            SectionKind::Section { macro_, .. } => macro_content(macro_),
            SectionKind::Repeater { content, child_sections } =>
                Content::Items(repeater_items(self.id.as_deref().unwrap_or(""),
                                              content,
                                              child_sections)),
        }
    }

    pub fn end_markup(&self) -> Option<String> {
        let tag = self.wrapper_tag()?;
        Some(format!("</{tag}>"))
    }
}


fn macro_content(macro_: &Option<MacroCall>) -> Content {
    match macro_ {
        Some(m) => Content::Macro(m.clone()),
        None => Content::Inline,
    }
}

/// The child section configurations of a repeater, ids formed from
/// the repeater id and the item's index or key.
fn repeater_items(
    base: &str,
    content: &Value,
    child_sections: &ChildSectionsCfg
) -> Vec<SectionCfg> {
    let child = |key: &str, keyval: Value, item: &Value| SectionCfg {
        id: Some(KString::from_string(format!("{base}_{key}"))),
        type_: child_sections.type_.clone(),
        attributes: child_sections.attributes.clone(),
        macro_: Some(MacroCall {
            name: child_sections.macro_.clone(),
            args: vec![item.clone(), keyval],
        }),
    };
    match content {
        Value::Array(vals) =>
            vals.iter().enumerate().map(
                |(i, item)| child(&i.to_string(), Value::from(i), item))
            .collect(),
        Value::Object(map) =>
            map.iter().map(
                |(k, item)| child(k, Value::from(k.as_str()), item))
            .collect(),
        // rejected by `SectionParams::check`
        _ => Vec::new(),
    }
}

impl SectionParams {
    /// The content a section built from these parameters would have,
    /// without building it.
    pub fn content(&self) -> Content {
        match self {
            SectionParams::Section(cfg) => macro_content(&cfg.macro_),
            SectionParams::Repeater(cfg) =>
                Content::Items(repeater_items(cfg.id.as_deref().unwrap_or(""),
                                              &cfg.content,
                                              &cfg.child_sections)),
        }
    }
}


/// Arena holding the sections of one render pass. Parents own their
/// children; the `parent` fields are back references for navigation
/// only.
pub struct SectionTree {
    tree_id: u32,
    id_prefix: KString,
    nodes: Vec<Option<SectionNode>>,
    // section id -> live section, for uniqueness and lookup
    id_map: HashMap<KString, SId>,
}

impl Default for SectionTree {
    fn default() -> Self {
        SectionTree::new(KString::from_static(""))
    }
}

impl fmt::Debug for SectionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionTree")
            .field("tree_id", &self.tree_id)
            .field("live", &self.len())
            .finish()
    }
}

impl SectionTree {
    /// `id_prefix` is prepended to section ids to form the ids of the
    /// wrapping elements in the document.
    pub fn new(id_prefix: KString) -> Self {
        SectionTree {
            tree_id: next_tree_id(),
            id_prefix,
            nodes: Vec::new(),
            id_map: HashMap::new(),
        }
    }

    fn index(&self, sid: SId) -> usize {
        if sid.tree_id == self.tree_id {
            sid.index as usize
        } else {
            panic!("SId from tree {} used with tree {}", sid.tree_id, self.tree_id)
        }
    }

    fn push(&mut self, node: SectionNode) -> SId {
        let index = self.nodes.len();
        self.nodes.push(Some(node));
        SId { tree_id: self.tree_id, index: index as u32 }
    }

    /// Number of live (not disposed) sections.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, sid: SId) -> Option<&SectionNode> {
        self.nodes.get(self.index(sid))?.as_ref()
    }

    pub fn get_mut(&mut self, sid: SId) -> Option<&mut SectionNode> {
        let i = self.index(sid);
        self.nodes.get_mut(i)?.as_mut()
    }

    /// Like `get`, for ids that must be live.
    pub fn node(&self, sid: SId) -> &SectionNode {
        self.get(sid).unwrap_or_else(
            || panic!("section {sid:?} is disposed"))
    }

    pub fn node_mut(&mut self, sid: SId) -> &mut SectionNode {
        self.get_mut(sid).unwrap_or_else(
            || panic!("section {sid:?} is disposed"))
    }

    pub fn find(&self, id: &str) -> Option<SId> {
        self.id_map.get(id).copied()
    }

    /// The id-less section a full render starts with.
    pub fn new_root(&mut self) -> SId {
        self.push(SectionNode {
            id: None,
            dom_id: None,
            is_root: true,
            kind: SectionKind::Section {
                type_: None,
                attributes: Vec::new(),
                macro_: None,
            },
            parent: None,
            children: Vec::new(),
            behaviors: Vec::new(),
            delegate_ids: Vec::new(),
            delegate_callbacks: Vec::new(),
            html: None,
            invalid: None,
        })
    }

    /// Allocate a section from its configuration. The result is not
    /// linked anywhere; check `is_valid` before using it and dispose
    /// it otherwise.
    pub fn construct(&mut self, params: SectionParams) -> SId {
        let mut invalid = params.check().err().map(|e| e.to_string());
        if invalid.is_none() {
            if let Some(id) = params.id() {
                if self.id_map.contains_key(id.as_str()) {
                    invalid = Some(format!("section id {:?} is already in use",
                                           id.as_str()));
                }
            }
        }
        let id = params.id().cloned();
        let dom_id = id.as_ref().map(
            |id| KString::from_string(format!("{}{}", self.id_prefix, id)));
        let kind = match params {
            SectionParams::Section(cfg) => SectionKind::Section {
                type_: cfg.type_,
                attributes: cfg.attributes.into_iter().collect(),
                macro_: cfg.macro_,
            },
            SectionParams::Repeater(cfg) => SectionKind::Repeater {
                content: cfg.content,
                child_sections: cfg.child_sections,
            },
        };
        let is_valid = invalid.is_none();
        let sid = self.push(SectionNode {
            id: id.clone(),
            dom_id,
            is_root: false,
            kind,
            parent: None,
            children: Vec::new(),
            behaviors: Vec::new(),
            delegate_ids: Vec::new(),
            delegate_callbacks: Vec::new(),
            html: None,
            invalid,
        });
        if is_valid {
            if let Some(id) = id {
                self.id_map.insert(id, sid);
            }
        }
        sid
    }

    pub fn is_valid(&self, sid: SId) -> bool {
        self.node(sid).is_valid()
    }

    pub fn link_child(&mut self, parent: SId, child: SId) {
        debug_assert!(self.node(child).parent.is_none(), "child is already linked");
        self.node_mut(parent).children.push(child);
        self.node_mut(child).parent = Some(parent);
    }

    /// Dispose `sid` and its descendants, depth first: behaviors are
    /// disposed and delegate ids released from `registry`. The section
    /// is removed from its parent's children.
    pub fn dispose(&mut self, sid: SId, registry: &dyn DelegateRegistry) {
        let parent = match self.get(sid) {
            Some(node) => node.parent,
            None => return,
        };
        self.dispose_subtree(sid, registry);
        if let Some(parent) = parent {
            if let Some(p) = self.get_mut(parent) {
                p.children.retain(|c| *c != sid);
            }
        }
    }

    fn dispose_subtree(&mut self, sid: SId, registry: &dyn DelegateRegistry) {
        let i = self.index(sid);
        let Some(mut node) = self.nodes.get_mut(i).and_then(Option::take) else {
            return
        };
        for child in std::mem::take(&mut node.children) {
            self.dispose_subtree(child, registry);
        }
        for bhv in &mut node.behaviors {
            bhv.dispose();
        }
        for id in &node.delegate_ids {
            registry.release(*id);
        }
        if let Some(id) = &node.id {
            if self.id_map.get(id.as_str()) == Some(&sid) {
                self.id_map.remove(id.as_str());
            }
        }
    }

    /// Dispose every section still alive in the tree.
    pub fn dispose_all(&mut self, registry: &dyn DelegateRegistry) {
        let roots: Vec<SId> = self.nodes.iter().enumerate().filter_map(
            |(i, n)| match n {
                Some(n) if n.parent.is_none() =>
                    Some(SId { tree_id: self.tree_id, index: i as u32 }),
                _ => None,
            }).collect();
        for sid in roots {
            self.dispose_subtree(sid, registry);
        }
    }

    /// Initialize the behaviors of `sid` and its descendants, parents
    /// first.
    pub fn init_behaviors(&mut self, sid: SId) -> Result<()> {
        let node = self.node_mut(sid);
        for bhv in &mut node.behaviors {
            bhv.init()?;
        }
        let children = node.children.clone();
        for child in children {
            self.init_behaviors(child)?;
        }
        Ok(())
    }

    /// Section ids of the subtree in document order, for debugging.
    pub fn outline(&self, sid: SId) -> String {
        let mut s = String::new();
        self.outline_into(sid, 0, &mut s);
        s
    }

    fn outline_into(&self, sid: SId, depth: usize, out: &mut String) {
        let node = self.node(sid);
        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push_str(node.id().unwrap_or("(root)"));
        if node.is_repeater() {
            out.push_str(" [repeater]");
        }
        if ! node.delegate_ids.is_empty() {
            out.push_str(&format!(" delegates={:?}",
                                  node.delegate_ids.iter().map(|d| d.0)
                                  .collect::<Vec<_>>()));
        }
        if ! node.behaviors.is_empty() {
            out.push_str(&format!(" behaviors={}", node.behaviors.len()));
        }
        out.push('\n');
        for child in &node.children {
            self.outline_into(*child, depth + 1, out);
        }
    }
}
