use std::{path::PathBuf, sync::atomic::Ordering};

use anyhow::{Result, anyhow};
use clap::Parser as ClapParser;
use markupwriter::{asection::{Delegate, DelegateRegistry, DomEvent, callback},
                   config::trace_from_env,
                   walk::WalkTemplate,
                   warn::TRACE};

#[derive(clap::Parser, Debug)]
/// Render a walk template (JSON) and print the markup.
struct Args {
    /// Path to the template file
    #[clap(required(true))]
    path: PathBuf,

    /// Only regenerate the section with this id
    #[clap(long)]
    section: Option<String>,

    /// Trace state transitions of the writer (also via the
    /// MARKUPWRITER_TRACE env var)
    #[clap(long)]
    trace: bool,

    /// Print the section tree after the markup
    #[clap(long)]
    tree: bool,

    /// Fire an event at a rendered section, as "SECTIONID:EVENT",
    /// e.g. "dish_0:click"
    #[clap(long)]
    dispatch: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    trace_from_env()?;
    if args.trace {
        TRACE.store(true, Ordering::Relaxed);
    }

    let mut template = WalkTemplate::load(&args.path)?;
    for name in template.handler_names() {
        let handler_name = name.clone();
        template.set_handler(&name, callback(move |ev| {
            println!("-> handler {:?} got {:?}", handler_name.as_str(), ev.event_type.as_str());
            true
        }));
    }

    let registry = Delegate::new();
    let rendered = template.render(&registry, args.section.as_deref())?;
    println!("{}", rendered.html());
    if args.tree {
        print!("{}", rendered.outline());
    }

    for d in &args.dispatch {
        let (section_id, event) = d.split_once(':').ok_or_else(
            || anyhow!("invalid --dispatch value {d:?}, expecting SECTIONID:EVENT"))?;
        let node = rendered.find(section_id).ok_or_else(
            || anyhow!("no section {section_id:?} was rendered"))?;
        for id in node.delegate_ids() {
            let mut ev = DomEvent::new(event);
            let ok = registry.dispatch(*id, &mut ev);
            println!("dispatch {event} to {id}: {ok}");
        }
    }

    rendered.dispose(&registry);
    Ok(())
}
