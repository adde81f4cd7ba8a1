//! `moonbind words` - print the reserved words.

use moonbind_engine::language::{is_control_flow_keyword, RESERVED_WORDS};

pub fn execute() -> anyhow::Result<()> {
    for word in RESERVED_WORDS {
        if is_control_flow_keyword(word) {
            println!("{}\tcontrol-flow", word);
        } else {
            println!("{}", word);
        }
    }
    Ok(())
}
