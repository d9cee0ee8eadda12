//! Templates given as data: named macros made of instruction lists,
//! e.g. read from JSON. Used by the `render_walk` tool and handy for
//! tests.

use std::{collections::{BTreeMap, BTreeSet}, path::Path};

use anyhow::{Result, Context, anyhow, bail};
use asection::{Behavior, Callback, DelegateRegistry, MacroCall, RepeaterCfg, SectionCfg};
use kstring::KString;
use serde::Deserialize;
use serde_json::Value;

use crate::{config::WriterOptions, template::Template,
            writer::{MarkupWriter, RenderedSection}};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    /// Raw markup.
    Write { markup: String },
    /// Text, escaped.
    Text { text: String },
    /// Argument of the current macro, escaped.
    Arg { index: usize },
    Section {
        cfg: SectionCfg,
        #[serde(default)]
        body: Vec<Instruction>,
    },
    Repeater { cfg: RepeaterCfg },
    /// Handler from the template's handler table for the element being
    /// written.
    On { event: KString, handler: KString },
    Behavior { name: KString },
    Container {
        name: KString,
        #[serde(default)]
        skip_content: bool,
        #[serde(default)]
        body: Vec<Instruction>,
    },
    Call {
        #[serde(rename = "macro")]
        macro_: MacroCall,
    },
}

/// Behavior that only knows its name.
#[derive(Debug, Clone)]
pub struct NamedBehavior {
    pub name: KString,
}

impl Behavior for NamedBehavior {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Deserialize)]
pub struct WalkTemplate {
    pub classpath: KString,
    #[serde(default = "default_id_prefix")]
    pub id_prefix: KString,
    #[serde(default = "default_main")]
    pub main: KString,
    pub macros: BTreeMap<KString, Vec<Instruction>>,
    #[serde(skip)]
    handlers: BTreeMap<KString, Callback>,
}

fn default_id_prefix() -> KString {
    KString::from_static("")
}

fn default_main() -> KString {
    KString::from_static("main")
}

impl WalkTemplate {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).with_context(|| anyhow!("parsing walk template"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(
            || anyhow!("reading walk template {path:?}"))?;
        Self::from_json(&s).with_context(|| anyhow!("in file {path:?}"))
    }

    pub fn set_handler(&mut self, name: &str, cb: Callback) {
        self.handlers.insert(KString::from_ref(name), cb);
    }

    /// Names of all handlers referenced by `on` instructions.
    pub fn handler_names(&self) -> BTreeSet<KString> {
        fn collect(instrs: &[Instruction], names: &mut BTreeSet<KString>) {
            for instr in instrs {
                match instr {
                    Instruction::On { handler, .. } => {
                        names.insert(handler.clone());
                    }
                    Instruction::Section { body, .. }
                    | Instruction::Container { body, .. } => collect(body, names),
                    _ => (),
                }
            }
        }
        let mut names = BTreeSet::new();
        for instrs in self.macros.values() {
            collect(instrs, &mut names);
        }
        names
    }

    /// Run one pass from the main macro; with `filter_section`, only
    /// that section is regenerated.
    pub fn render(
        &self,
        registry: &dyn DelegateRegistry,
        filter_section: Option<&str>
    ) -> Result<RenderedSection> {
        let options = WriterOptions {
            filter_section: filter_section.map(KString::from_ref),
            id_prefix: self.id_prefix.clone(),
        };
        let mut out = MarkupWriter::new(self, registry, options);
        out.call_macro(&MacroCall::new(&self.main))?;
        Ok(out.finish()?)
    }

    fn run(&self, instrs: &[Instruction], args: &[Value], out: &mut MarkupWriter)
           -> Result<()> {
        for instr in instrs {
            match instr {
                Instruction::Write { markup } => out.write(markup),
                Instruction::Text { text } => out.write_text(text),
                Instruction::Arg { index } => {
                    let val = args.get(*index).ok_or_else(
                        || anyhow!("macro has no argument #{index}"))?;
                    match val {
                        Value::String(s) => out.write_text(s),
                        v => out.write_text(&v.to_string()),
                    }
                }
                Instruction::Section { cfg, body } => {
                    out.begin_section(cfg.clone())?;
                    self.run(body, args, out)?;
                    out.end_section();
                }
                Instruction::Repeater { cfg } => out.repeater(cfg.clone())?,
                Instruction::On { event, handler } => {
                    let cb = self.handlers.get(handler.as_str()).ok_or_else(
                        || anyhow!("no handler {:?} for event {:?}",
                                   handler.as_str(), event.as_str()))?;
                    out.push_delegate(event, cb.clone());
                }
                Instruction::Behavior { name } =>
                    out.register_behavior(Box::new(NamedBehavior { name: name.clone() })),
                Instruction::Container { name, skip_content, body } => {
                    let outer_skip = out.skip_content();
                    out.push_container(Box::new(name.clone()));
                    out.set_skip_content(*skip_content);
                    if ! out.skip_content() {
                        self.run(body, args, out)?;
                    }
                    out.set_skip_content(outer_skip);
                    out.pop_container();
                }
                Instruction::Call { macro_ } => out.call_macro(macro_)?,
            }
        }
        Ok(())
    }
}

impl Template for WalkTemplate {
    fn classpath(&self) -> &str {
        &self.classpath
    }

    fn call_macro(&self, call: &MacroCall, out: &mut MarkupWriter) -> Result<()> {
        let instrs = match self.macros.get(call.name.as_str()) {
            Some(instrs) => instrs,
            None => bail!("no macro {:?} in template {:?}",
                          call.name.as_str(), self.classpath.as_str()),
        };
        self.run(instrs, &call.args, out)
    }
}
