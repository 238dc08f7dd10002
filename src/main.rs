use std::fs;
use std::io::{self, Read};

use anyhow::{Context as _, Result, bail};
use mython::parser;
use mython::runtime::{Closure, SimpleContext};
use mython::statement;

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let input_path = args.next();
    if args.next().is_some() {
        bail!("Only one input file is supported");
    }

    let source = if let Some(path) = &input_path {
        fs::read_to_string(path).with_context(|| format!("Reading {path}"))?
    } else {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Reading stdin")?;
        buffer
    };

    let program = parser::parse_program(&source)?;

    let mut globals = Closure::new();
    let mut context = SimpleContext::new(io::stdout());
    statement::execute_program(&program, &mut globals, &mut context)?;
    Ok(())
}
