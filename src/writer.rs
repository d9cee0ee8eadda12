//! The writer a template's instructions are executed against. It
//! collects markup fragments and builds the section tree of the pass.
//! For a partial refresh it only lets through the calls belonging to
//! the one section being regenerated.

use std::{any::Any, mem};

use anyhow::{Result, Context, anyhow};
use asection::{Behavior, Callback, Content, DelegateMap, DelegateRegistry, MacroCall,
               RepeaterCfg, SId, SectionCfg, SectionNode, SectionParams, SectionTree,
               escape::html_escape};
use kstring::KString;

use crate::{config::WriterOptions, def_boxed_thiserror, template::Template, trace, warn};


def_boxed_thiserror!(WriterError, pub enum WriterErrorKind {
    #[error("error while refreshing template '{classpath}': filter section \
             '{section}' was not found")]
    SectionFilterNotFound {
        classpath: KString,
        section: KString,
    },
});


/// Only ever moves forward, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SectionState {
    /// Partial refresh, the filter section has not been seen yet:
    /// everything is skipped, but sections are entered to look for it.
    Searching,
    /// Everything is kept: full render, or inside the filter section.
    Keeping,
    /// The filter section has been closed, everything is skipped.
    Skipping,
}

pub struct MarkupWriter<'t> {
    template: &'t dyn Template,
    registry: &'t dyn DelegateRegistry,
    tree: SectionTree,
    out: Vec<String>,
    ctrl_stack: Vec<Box<dyn Any>>,
    state: SectionState,
    // Appends or does nothing; only changed on state transitions.
    write_impl: fn(&mut MarkupWriter<'t>, &str),
    filter: Option<KString>,
    top: Option<SId>,
    active: Option<SId>,
    // Events for the element currently being written, flushed at its `>`.
    delegate_map: Option<DelegateMap>,
    // One entry per section opened while keeping, `None` for sections
    // dropped for invalid configuration; popped by end_section.
    open_sections: Vec<Option<SId>>,
    skip_content: bool,
}

impl<'t> MarkupWriter<'t> {
    pub fn new(
        template: &'t dyn Template,
        registry: &'t dyn DelegateRegistry,
        options: WriterOptions,
    ) -> Self {
        let mut tree = SectionTree::new(options.id_prefix);
        let filter = options.filter_section;
        let (state, top): (_, Option<SId>) = match &filter {
            None => (SectionState::Keeping, Some(tree.new_root())),
            Some(_) => (SectionState::Searching, None),
        };
        trace!("{}: start {:?} pass, filter {:?}", template.classpath(), state, filter);
        MarkupWriter {
            template,
            registry,
            tree,
            out: Vec::new(),
            ctrl_stack: Vec::new(),
            state,
            write_impl: if filter.is_none() { Self::write_ok } else { Self::write_skip },
            filter,
            top,
            active: top,
            delegate_map: None,
            open_sections: Vec::new(),
            skip_content: false,
        }
    }

    pub fn state(&self) -> SectionState {
        self.state
    }

    pub fn filter_section(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn tree(&self) -> &SectionTree {
        &self.tree
    }

    pub fn active_section(&self) -> Option<&SectionNode> {
        self.active.map(|sid| self.tree.node(sid))
    }

    /// Put markup into the output (or not, depending on the state).
    pub fn write(&mut self, m: &str) {
        (self.write_impl)(self, m)
    }

    /// Write `s` as HTML-escaped text.
    pub fn write_text(&mut self, s: &str) {
        let escaped = html_escape(s);
        self.write(&escaped);
    }

    fn write_ok(&mut self, m: &str) {
        if let Some(closing) = m.find('>') {
            if let Some(map) = self.delegate_map.take() {
                let id = self.registry.register_batch(map);
                if let Some(sid) = self.active {
                    self.tree.node_mut(sid).add_delegate_id(id);
                }
                self.out.push(m[..closing].to_string());
                self.out.push(format!(" {}", self.registry.markup_for(id)));
                self.out.push(m[closing..].to_string());
                return;
            }
        }
        self.out.push(m.to_string());
    }

    fn write_skip(&mut self, _m: &str) {}

    fn switch_to(&mut self, state: SectionState) {
        debug_assert!(state > self.state, "section state can only move forward");
        trace!("{}: {:?} -> {:?}", self.template.classpath(), self.state, state);
        self.state = state;
        self.write_impl = match state {
            SectionState::Keeping => Self::write_ok,
            SectionState::Searching | SectionState::Skipping => Self::write_skip,
        };
    }

    pub fn begin_section(&mut self, cfg: SectionCfg) -> Result<()> {
        self.begin_section_or_repeater(SectionParams::Section(cfg))
    }

    /// A repeater is opened and closed right away, its items are
    /// generated from its configuration.
    pub fn repeater(&mut self, cfg: RepeaterCfg) -> Result<()> {
        self.begin_section_or_repeater(SectionParams::Repeater(cfg))?;
        self.end_section();
        Ok(())
    }

    fn begin_section_or_repeater(&mut self, params: SectionParams) -> Result<()> {
        if self.state == SectionState::Skipping {
            return Ok(())
        }

        if self.state != SectionState::Keeping && params.id() != self.filter.as_ref() {
            // Nothing is allocated or written here, but the section's
            // generated content may contain the one we're looking for.
            return self.run_content(params.content())
        }

        let sid = self.tree.construct(params);
        if ! self.tree.is_valid(sid) {
            let node = self.tree.node(sid);
            warn!("template {:?}: dropping section {:?}: {}",
                  self.template.classpath(),
                  node.id().unwrap_or(""),
                  node.invalid_reason().unwrap_or(""));
            self.tree.dispose(sid, self.registry);
            if self.state == SectionState::Keeping {
                self.open_sections.push(None);
            }
            return Ok(())
        }

        if self.state == SectionState::Keeping {
            if let Some(parent) = self.active {
                self.tree.link_child(parent, sid);
            }
            self.on_begin_content(sid);
        } else {
            // This is the filter section; it becomes the root of the
            // result, its wrapper is already in the document.
            self.switch_to(SectionState::Keeping);
        }
        trace!("{}: open section {:?}", self.template.classpath(),
               self.tree.node(sid).id());
        self.open_sections.push(Some(sid));
        self.active = Some(sid);
        self.on_content(sid)
    }

    pub fn end_section(&mut self) {
        if self.state != SectionState::Keeping {
            return
        }
        if let Some(None) = self.open_sections.pop() {
            // the dropped section's own end
            return
        }
        let sid = self.active.expect("a section is always active while keeping");
        let node = self.tree.node(sid);
        if self.filter.is_some() && node.id() == self.filter.as_deref() {
            self.top = Some(sid);
            self.switch_to(SectionState::Skipping);
        } else {
            let parent = node.parent();
            self.on_end_content(sid);
            self.active = parent;
            assert!(self.active.is_some(),
                    "end_section closed the outermost section of template {:?} \
                     (unbalanced begin_section/end_section)",
                    self.template.classpath());
        }
    }

    fn on_begin_content(&mut self, sid: SId) {
        if let Some(m) = self.tree.node(sid).begin_markup() {
            self.write(&m);
        }
    }

    fn on_content(&mut self, sid: SId) -> Result<()> {
        let content = self.tree.node(sid).content();
        self.run_content(content)
    }

    fn on_end_content(&mut self, sid: SId) {
        if let Some(m) = self.tree.node(sid).end_markup() {
            self.write(&m);
        }
    }

    fn run_content(&mut self, content: Content) -> Result<()> {
        match content {
            Content::Inline => Ok(()),
            Content::Macro(call) => self.call_macro(&call),
            Content::Items(items) => {
                for cfg in items {
                    self.begin_section(cfg)?;
                    self.end_section();
                }
                Ok(())
            }
        }
    }

    /// Call a macro of the current template.
    pub fn call_macro(&mut self, call: &MacroCall) -> Result<()> {
        let template = self.template;
        template.call_macro(call, self).with_context(
            || anyhow!("in macro {:?} of template {:?}",
                       call.name.as_str(), template.classpath()))
    }

    /// Attach `callback` for `event_name` to the element whose markup
    /// is being written; it's referenced from the element's markup
    /// once its start tag is closed.
    pub fn push_delegate(&mut self, event_name: &str, callback: Callback) {
        // no section during a partial refresh before the filter section
        let Some(sid) = self.active else {
            return
        };
        if self.state != SectionState::Keeping {
            return
        }

        if ! self.registry.can_delegate(event_name) {
            let id = self.registry.register(callback);
            self.tree.node_mut(sid).add_delegate_id(id);
            let markup = self.registry.fallback_markup_for(event_name, id);
            self.write(&markup);
            return
        }

        self.tree.node_mut(sid).add_delegate_callback(callback.clone());
        self.delegate_map.get_or_insert_with(DelegateMap::new)
            .insert(KString::from_ref(event_name), callback);
    }

    /// Register a widget behavior with the current section, so that it
    /// is initialized once the markup is inserted.
    pub fn register_behavior(&mut self, bhv: Box<dyn Behavior>) {
        if self.state != SectionState::Keeping {
            return
        }
        if let Some(sid) = self.active {
            self.tree.node_mut(sid).add_behavior(bhv);
        }
    }

    pub fn push_container(&mut self, container: Box<dyn Any>) {
        self.ctrl_stack.push(container);
    }

    pub fn pop_container(&mut self) -> Option<Box<dyn Any>> {
        self.ctrl_stack.pop()
    }

    pub fn current_container(&self) -> Option<&dyn Any> {
        self.ctrl_stack.last().map(|c| &**c)
    }

    pub fn container_depth(&self) -> usize {
        self.ctrl_stack.len()
    }

    /// Set by container widgets that want their content left out.
    pub fn skip_content(&self) -> bool {
        self.skip_content
    }

    pub fn set_skip_content(&mut self, skip: bool) {
        self.skip_content = skip;
    }

    /// End the pass: the top section receives the markup and is handed
    /// over to the caller, together with the tree it lives in. For a
    /// partial refresh that is the filter section.
    pub fn finish(mut self) -> Result<RenderedSection, WriterError> {
        self.delegate_map = None;
        self.ctrl_stack.clear();
        let out = mem::take(&mut self.out);
        match self.top.take() {
            Some(top) => {
                self.tree.node_mut(top).set_html(out.concat());
                self.active = None;
                Ok(RenderedSection {
                    tree: mem::take(&mut self.tree),
                    root: top,
                })
            }
            None => {
                let section = self.filter.clone().unwrap_or_else(
                    || KString::from_static(""));
                let classpath = KString::from_ref(self.template.classpath());
                warn!("error while refreshing template {:?}: filter section {:?} \
                       was not found", classpath.as_str(), section.as_str());
                Err(WriterErrorKind::SectionFilterNotFound { classpath, section }.into())
            }
        }
    }
}

impl<'t> Drop for MarkupWriter<'t> {
    fn drop(&mut self) {
        // Whatever wasn't handed over by `finish`.
        self.tree.dispose_all(self.registry);
    }
}


/// The result of a pass: the top section with its markup, owning the
/// sections below it.
#[derive(Debug)]
pub struct RenderedSection {
    tree: SectionTree,
    root: SId,
}

impl RenderedSection {
    pub fn root(&self) -> SId {
        self.root
    }

    pub fn root_node(&self) -> &SectionNode {
        self.tree.node(self.root)
    }

    pub fn html(&self) -> &str {
        self.root_node().html().unwrap_or("")
    }

    pub fn tree(&self) -> &SectionTree {
        &self.tree
    }

    pub fn node(&self, sid: SId) -> &SectionNode {
        self.tree.node(sid)
    }

    pub fn children(&self, sid: SId) -> impl Iterator<Item = &SectionNode> + '_ {
        self.tree.node(sid).children().iter().map(move |c| self.tree.node(*c))
    }

    pub fn find(&self, id: &str) -> Option<&SectionNode> {
        self.tree.find(id).and_then(|sid| self.tree.get(sid))
    }

    /// To be called once the markup has been inserted into the document.
    pub fn init_behaviors(&mut self) -> Result<()> {
        self.tree.init_behaviors(self.root)
    }

    pub fn outline(&self) -> String {
        self.tree.outline(self.root)
    }

    /// Dispose all sections, releasing their delegate ids from
    /// `registry`, e.g. when the markup is replaced.
    pub fn dispose(mut self, registry: &dyn DelegateRegistry) {
        self.tree.dispose_all(registry);
    }
}


#[cfg(test)]
mod tests {
    use std::{cell::{Cell, RefCell}, collections::BTreeMap, rc::Rc,
              sync::{Arc, atomic::{AtomicUsize, Ordering}}};

    use anyhow::bail;
    use asection::{Delegate, DelegateId, DomEvent, callback};
    use serde_json::{Value, json};

    use super::*;

    type MacroFn = fn(&[Value], &mut MarkupWriter) -> Result<()>;

    struct TestTemplate(BTreeMap<&'static str, MacroFn>);

    impl TestTemplate {
        fn new(macros: &[(&'static str, MacroFn)]) -> Self {
            TestTemplate(macros.iter().cloned().collect())
        }
    }

    impl Template for TestTemplate {
        fn classpath(&self) -> &str {
            "test.Template"
        }

        fn call_macro(&self, call: &MacroCall, out: &mut MarkupWriter) -> Result<()> {
            match self.0.get(call.name.as_str()) {
                Some(f) => f(&call.args, out),
                None => bail!("no macro {:?}", call.name.as_str()),
            }
        }
    }

    fn row(args: &[Value], out: &mut MarkupWriter) -> Result<()> {
        out.write_text(args[0].as_str().unwrap_or("?"));
        Ok(())
    }

    fn greeting(_args: &[Value], out: &mut MarkupWriter) -> Result<()> {
        out.write("<b>");
        out.begin_section(SectionCfg::with_id("inner").tag("i"))?;
        out.write("deep");
        out.end_section();
        out.write("</b>");
        Ok(())
    }

    fn no_macros() -> TestTemplate {
        TestTemplate::new(&[])
    }

    /// Registry with predictable markup that records what it was asked.
    #[derive(Default)]
    struct FakeRegistry {
        next: Cell<u32>,
        batches: RefCell<Vec<Vec<String>>>,
        released: RefCell<Vec<DelegateId>>,
    }

    impl DelegateRegistry for FakeRegistry {
        fn can_delegate(&self, event_name: &str) -> bool {
            event_name != "focus"
        }
        fn register(&self, _cb: Callback) -> DelegateId {
            let id = self.next.get();
            self.next.set(id + 1);
            DelegateId(id)
        }
        fn register_batch(&self, map: DelegateMap) -> DelegateId {
            self.batches.borrow_mut().push(map.keys().map(|k| k.to_string()).collect());
            self.register(callback(|_| true))
        }
        fn markup_for(&self, id: DelegateId) -> String {
            format!("D{id}")
        }
        fn fallback_markup_for(&self, event_name: &str, id: DelegateId) -> String {
            format!(" F{event_name}{id}")
        }
        fn release(&self, id: DelegateId) {
            self.released.borrow_mut().push(id);
        }
        fn dispatch(&self, _id: DelegateId, _event: &mut DomEvent) -> bool {
            true
        }
    }

    // A template walk with sections A > B and C, around plain markup.
    fn walk_abc(out: &mut MarkupWriter) -> Result<()> {
        out.write("<p>");
        out.begin_section(SectionCfg::with_id("A").tag("div"))?;
        out.write("a1");
        out.begin_section(SectionCfg::with_id("B").tag("span"))?;
        out.write("b");
        out.end_section();
        out.write("a2");
        out.end_section();
        out.begin_section(SectionCfg::with_id("C"))?;
        out.write("c");
        out.end_section();
        out.write("</p>");
        Ok(())
    }

    #[test]
    fn t_single_section() -> Result<()> {
        let template = no_macros();
        let registry = Delegate::new();
        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::full());
        w.begin_section(SectionCfg::with_id("A"))?;
        w.write("hi");
        w.end_section();
        let r = w.finish()?;
        assert!(r.root_node().is_root());
        assert_eq!(r.root_node().id(), None);
        let children: Vec<_> = r.children(r.root()).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id(), Some("A"));
        assert_eq!(r.html(), "hi");
        Ok(())
    }

    #[test]
    fn t_full_render() -> Result<()> {
        let template = no_macros();
        let registry = Delegate::new();
        let mut w = MarkupWriter::new(&template, &registry,
                                      WriterOptions::full().id_prefix("t0_"));
        assert_eq!(w.state(), SectionState::Keeping);
        walk_abc(&mut w)?;
        assert_eq!(w.state(), SectionState::Keeping);
        let r = w.finish()?;
        assert_eq!(r.html(),
                   "<p><div id=\"t0_A\">a1<span id=\"t0_B\">b</span>a2</div>c</p>");
        assert_eq!(r.outline(), "(root)\n  A\n    B\n  C\n");
        let b = r.find("B").expect("B exists");
        assert_eq!(b.dom_id(), Some("t0_B"));
        assert_eq!(r.node(b.parent().expect("has parent")).id(), Some("A"));
        Ok(())
    }

    #[test]
    fn t_partial_refresh() -> Result<()> {
        let template = no_macros();
        let registry = Delegate::new();

        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::partial("A"));
        assert_eq!(w.state(), SectionState::Searching);
        walk_abc(&mut w)?;
        assert_eq!(w.state(), SectionState::Skipping);
        let r = w.finish()?;
        // The wrapper of the filter section itself is not regenerated.
        assert_eq!(r.html(), "a1<span id=\"B\">b</span>a2");
        assert_eq!(r.root_node().id(), Some("A"));
        assert_eq!(r.outline(), "A\n  B\n");
        assert!(r.find("C").is_none());

        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::partial("B"));
        walk_abc(&mut w)?;
        let r = w.finish()?;
        assert_eq!(r.html(), "b");
        assert_eq!(r.root_node().parent(), None);
        assert_eq!(r.tree().len(), 1);
        Ok(())
    }

    #[test]
    fn t_filter_not_found() -> Result<()> {
        let template = no_macros();
        let registry = Delegate::new();
        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::partial("Z"));
        walk_abc(&mut w)?;
        assert_eq!(w.state(), SectionState::Searching);
        match w.finish() {
            Ok(_) => panic!("should not find a section"),
            Err(e) => {
                match e.kind() {
                    WriterErrorKind::SectionFilterNotFound { classpath, section } => {
                        assert_eq!(classpath.as_str(), "test.Template");
                        assert_eq!(section.as_str(), "Z");
                    }
                }
                assert_eq!(e.to_string(),
                           "error while refreshing template 'test.Template': \
                            filter section 'Z' was not found");
            }
        }
        Ok(())
    }

    #[test]
    fn t_delegate_click() -> Result<()> {
        let template = no_macros();
        let registry = Delegate::new();
        let clicks = Arc::new(AtomicUsize::new(0));
        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::full());
        w.write("<div");
        let c = clicks.clone();
        w.push_delegate("click", callback(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            true
        }));
        w.write(">x</div>");
        let r = w.finish()?;
        let ids = r.root_node().delegate_ids();
        assert_eq!(ids.len(), 1);
        assert_eq!(r.html(), format!("<div {}>x</div>", registry.markup_for(ids[0])));
        assert!(registry.dispatch(ids[0], &mut DomEvent::new("click")));
        assert_eq!(clicks.load(Ordering::SeqCst), 1);
        assert_eq!(r.root_node().delegate_callbacks().len(), 1);
        Ok(())
    }

    #[test]
    fn t_delegates_batched_per_element() -> Result<()> {
        let template = no_macros();
        let registry = FakeRegistry::default();
        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::full());
        w.write("<a href=\"#\"");
        w.push_delegate("mouseup", callback(|_| true));
        w.push_delegate("click", callback(|_| true));
        w.push_delegate("keydown", callback(|_| true));
        w.write(" class=\"x\"");
        w.write(">go</a><b>");
        w.push_delegate("click", callback(|_| true));
        w.write("<i>");
        let r = w.finish()?;
        assert_eq!(r.html(), "<a href=\"#\" class=\"x\" D0>go</a><b><i D1>");
        assert_eq!(*registry.batches.borrow(),
                   vec![vec!["click".to_string(), "keydown".into(), "mouseup".into()],
                        vec!["click".to_string()]]);
        Ok(())
    }

    #[test]
    fn t_fallback_delegate() -> Result<()> {
        let template = no_macros();
        let registry = FakeRegistry::default();
        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::full());
        w.write("<input");
        w.push_delegate("focus", callback(|_| true));
        w.push_delegate("click", callback(|_| true));
        w.write(">");
        let r = w.finish()?;
        assert_eq!(r.html(), "<input Ffocus0 D1>");
        assert_eq!(r.root_node().delegate_ids(), &[DelegateId(0), DelegateId(1)]);
        // only the delegated one is kept as a callback
        assert_eq!(r.root_node().delegate_callbacks().len(), 1);
        Ok(())
    }

    #[test]
    fn t_delegates_ignored_outside_filter() -> Result<()> {
        let template = no_macros();
        let registry = Delegate::new();
        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::partial("B"));
        w.write("<div");
        w.push_delegate("click", callback(|_| true));
        w.write(">");
        w.begin_section(SectionCfg::with_id("B"))?;
        w.write("<em");
        w.push_delegate("click", callback(|_| true));
        w.write(">x</em>");
        w.end_section();
        w.write("<div");
        w.push_delegate("click", callback(|_| true));
        w.write(">");
        let r = w.finish()?;
        assert_eq!(registry.len(), 1);
        let id = r.root_node().delegate_ids()[0];
        assert_eq!(r.html(), format!("<em {}>x</em>", registry.markup_for(id)));
        Ok(())
    }

    #[test]
    #[should_panic(expected = "unbalanced")]
    fn t_unbalanced_end_section() {
        let template = no_macros();
        let registry = Delegate::new();
        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::full());
        w.begin_section(SectionCfg::with_id("A")).unwrap();
        w.end_section();
        w.end_section();
    }

    #[test]
    fn t_invalid_section_is_dropped() -> Result<()> {
        let template = no_macros();
        let registry = Delegate::new();
        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::full());
        w.begin_section(SectionCfg::with_id("A"))?;
        w.begin_section(SectionCfg::with_id("bad id").tag("div"))?;
        w.write("kept");
        w.end_section();
        // closes A, not the dropped one
        w.end_section();
        w.begin_section(SectionCfg::with_id("A"))?; // duplicate
        w.end_section();
        w.repeater(RepeaterCfg::new("r", json!("not a list"), "row"))?;
        assert_eq!(w.active_section().map(|s| s.is_root()), Some(true));
        let r = w.finish()?;
        assert_eq!(r.html(), "kept");
        assert_eq!(r.outline(), "(root)\n  A\n");
        Ok(())
    }

    #[test]
    fn t_valid_section_inside_dropped_one() -> Result<()> {
        let template = no_macros();
        let registry = Delegate::new();
        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::full());
        w.begin_section(SectionCfg::with_id("bad id"))?;
        w.begin_section(SectionCfg::with_id("C").tag("span"))?;
        w.write("c");
        w.end_section();
        w.write("<a");
        w.push_delegate("click", callback(|_| true));
        w.write(">after</a>");
        w.end_section();
        w.write("root");
        let r = w.finish()?;
        let id = r.root_node().delegate_ids()[0];
        assert_eq!(r.html(), format!("<span id=\"C\">c</span><a {}>after</a>root",
                                     registry.markup_for(id)));
        assert_eq!(r.find("C").map(|c| c.delegate_ids().len()), Some(0));
        assert_eq!(r.outline(), "(root) delegates=[0]\n  C\n");
        Ok(())
    }

    #[test]
    fn t_repeater() -> Result<()> {
        let template = TestTemplate::new(&[("row", row)]);
        let registry = Delegate::new();
        let rows = || RepeaterCfg::new("rows", json!(["x", "<y>"]), "row").child_tag("li");

        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::full());
        w.write("<ul>");
        w.repeater(rows())?;
        w.write("</ul>");
        let r = w.finish()?;
        assert_eq!(r.html(),
                   "<ul><li id=\"rows_0\">x</li><li id=\"rows_1\">&lt;y&gt;</li></ul>");
        assert_eq!(r.outline(), "(root)\n  rows [repeater]\n    rows_0\n    rows_1\n");

        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::partial("rows_1"));
        w.write("<ul>");
        w.repeater(rows())?;
        w.write("</ul>");
        let r = w.finish()?;
        assert_eq!(r.html(), "&lt;y&gt;");
        Ok(())
    }

    #[test]
    fn t_macro_sections() -> Result<()> {
        let template = TestTemplate::new(&[("greeting", greeting)]);
        let registry = Delegate::new();
        let cfg = || SectionCfg::with_id("outer").tag("div")
            .macro_call(MacroCall::new("greeting"));

        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::full());
        w.begin_section(cfg())?;
        w.end_section();
        let r = w.finish()?;
        assert_eq!(r.html(), "<div id=\"outer\"><b><i id=\"inner\">deep</i></b></div>");

        // found while walking the content of a section that isn't kept
        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::partial("inner"));
        w.begin_section(cfg())?;
        w.end_section();
        let r = w.finish()?;
        assert_eq!(r.html(), "deep");

        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::full());
        let res = w.begin_section(SectionCfg::with_id("x")
                                  .macro_call(MacroCall::new("missing")));
        assert!(res.is_err());
        Ok(())
    }

    fn broken(_args: &[Value], _out: &mut MarkupWriter) -> Result<()> {
        bail!("broken macro")
    }

    #[test]
    fn t_search_runs_content_of_other_sections() -> Result<()> {
        let template = TestTemplate::new(&[("broken", broken), ("greeting", greeting)]);
        let registry = Delegate::new();
        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::partial("inner"));
        let res = w.begin_section(SectionCfg::with_id("other")
                                  .macro_call(MacroCall::new("broken")));
        let err = match res {
            Ok(()) => panic!("the macro of a section that isn't kept still runs"),
            Err(e) => e,
        };
        assert!(format!("{err:#}").contains("broken macro"));
        assert_eq!(w.state(), SectionState::Searching);
        assert!(w.tree().is_empty());

        // once the filter section was written, nothing is run any more
        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::partial("inner"));
        w.begin_section(SectionCfg::with_id("outer").macro_call(MacroCall::new("greeting")))?;
        w.end_section();
        w.begin_section(SectionCfg::with_id("other").macro_call(MacroCall::new("broken")))?;
        w.end_section();
        assert_eq!(w.finish()?.html(), "deep");
        Ok(())
    }

    #[test]
    fn t_dispose_releases_delegates() -> Result<()> {
        let template = no_macros();
        let registry = Delegate::new();
        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::full());
        w.begin_section(SectionCfg::with_id("A"))?;
        w.write("<a");
        w.push_delegate("click", callback(|_| true));
        w.write(">");
        w.write("<input");
        w.push_delegate("blur", callback(|_| true));
        w.write(">");
        w.end_section();
        let r = w.finish()?;
        assert_eq!(registry.len(), 2);
        assert_eq!(r.find("A").map(|a| a.delegate_ids().len()), Some(2));
        r.dispose(&registry);
        assert!(registry.is_empty());
        Ok(())
    }

    #[test]
    fn t_dropped_writer_releases_delegates() {
        let template = no_macros();
        let registry = FakeRegistry::default();
        {
            let mut w = MarkupWriter::new(&template, &registry, WriterOptions::full());
            w.write("<a");
            w.push_delegate("focus", callback(|_| true));
        }
        assert_eq!(*registry.released.borrow(), vec![DelegateId(0)]);
    }

    #[derive(Debug)]
    struct Tooltip(Rc<Cell<u32>>);

    impl Behavior for Tooltip {
        fn name(&self) -> &str {
            "tooltip"
        }
        fn init(&mut self) -> Result<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn t_behaviors() -> Result<()> {
        let template = no_macros();
        let registry = Delegate::new();
        let inits = Rc::new(Cell::new(0));
        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::partial("A"));
        w.register_behavior(Box::new(Tooltip(inits.clone())));
        w.begin_section(SectionCfg::with_id("A"))?;
        w.register_behavior(Box::new(Tooltip(inits.clone())));
        w.end_section();
        w.register_behavior(Box::new(Tooltip(inits.clone())));
        let mut r = w.finish()?;
        assert_eq!(r.root_node().behaviors().len(), 1);
        assert_eq!(r.root_node().behaviors()[0].name(), "tooltip");
        r.init_behaviors()?;
        assert_eq!(inits.get(), 1);
        Ok(())
    }

    #[test]
    fn t_container_stack() {
        let template = no_macros();
        let registry = Delegate::new();
        let mut w = MarkupWriter::new(&template, &registry, WriterOptions::partial("x"));
        assert!(w.pop_container().is_none());
        w.push_container(Box::new("dialog"));
        w.push_container(Box::new(42u32));
        assert_eq!(w.container_depth(), 2);
        assert_eq!(w.current_container().and_then(|c| c.downcast_ref::<u32>()),
                   Some(&42));
        let top = w.pop_container().expect("pushed");
        assert_eq!(top.downcast_ref::<u32>(), Some(&42));
        assert_eq!(w.pop_container().and_then(|c| c.downcast_ref::<&'static str>().copied()),
                   Some("dialog"));
        assert_eq!(w.container_depth(), 0);
    }
}
