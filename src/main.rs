/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use anyhow::{Context, Result};
use clap::Parser as clap_parser;
use clap::ValueEnum;
use mcasm::assemble_source;
use mcasm::assembler::OutputFormat;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(clap_parser)]
#[clap(version, about = "Assembler for the MCPU ISA")]
struct Opts {
    /// Assembly source file
    input: PathBuf,
    /// Output binary image
    output: PathBuf,
    /// Image format to emit
    #[clap(long, value_enum, default_value = "sectioned")]
    format: Format,
    /// Print the parsed and laid-out program to stdout
    #[clap(long)]
    dump: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Address/length header per section
    Sectioned,
    /// Raw bytes in address order, gaps zero-filled
    Flat,
}

impl From<Format> for OutputFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Sectioned => OutputFormat::Sectioned,
            Format::Flat => OutputFormat::Flat,
        }
    }
}

fn run() -> Result<ExitCode> {
    let opts: Opts = Opts::parse();

    let source = fs::read_to_string(&opts.input)
        .with_context(|| format!("Failed to read input file: {}", opts.input.display()))?;
    let file_name = opts.input.display().to_string();

    match assemble_source(&file_name, &source, opts.format.into(), opts.dump) {
        Ok(image) => {
            fs::write(&opts.output, image)
                .with_context(|| format!("Failed to write output file: {}", opts.output.display()))?;
            println!(
                "Successfully assembled {} to {}",
                opts.input.display(),
                opts.output.display()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => Ok(ExitCode::from(failure.exit_code())),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
