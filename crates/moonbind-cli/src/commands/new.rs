//! `moonbind new` - print a class template.

use moonbind_engine::language::template;

pub fn execute(class: String, base: String) -> anyhow::Result<()> {
    print!("{}", template(&class, &base));
    Ok(())
}
