//! Section trees for incremental markup generation: named, nestable
//! regions of generated markup that can be re-rendered on their own,
//! plus the event delegation table their markup refers to.

pub mod escape;
pub mod cfg;
pub mod delegate;
pub mod tree;

pub use cfg::{MacroCall, SectionCfg, RepeaterCfg, ChildSectionsCfg, SectionParams};
pub use delegate::{DelegateRegistry, Delegate, DelegateId, DelegateMap, DomEvent,
                   Callback, callback};
pub use tree::{SectionTree, SectionNode, SectionKind, SId, Content, Behavior};
