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

pub mod assembler;
pub mod ast;
pub mod diagnostics;
pub mod errors;
pub mod eval;
pub mod parser;

use assembler::OutputFormat;
use diagnostics::Diagnostics;
use errors::AssemblyError;
use eval::Evaluator;
use thiserror::Error;

extern crate pest;
extern crate pest_derive;

/// Why an assembly run produced no image. The CLI maps this onto its exit
/// code: parse failures are 1, everything later is 2.
#[derive(Debug, Error)]
pub enum AssembleFailure {
    #[error("parsing failed")]
    Parse,
    #[error("layout failed")]
    Layout,
    #[error("internal error: {0}")]
    Internal(AssemblyError),
}

impl AssembleFailure {
    pub fn exit_code(&self) -> u8 {
        match self {
            AssembleFailure::Parse => 1,
            AssembleFailure::Layout | AssembleFailure::Internal(_) => 2,
        }
    }
}

/// Assemble a single translation unit down to its binary image.
///
/// Diagnostics go to stderr as they are found; every phase keeps running
/// after an error so one run surfaces as many problems as possible, and the
/// phase outcome is checked once the phase has finished.
pub fn assemble_source(
    file_name: &str,
    source: &str,
    format: OutputFormat,
    dump: bool,
) -> Result<Vec<u8>, AssembleFailure> {
    let mut diag = Diagnostics::new(file_name, source);

    let mut program = match parser::parse_source(source, &mut diag) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("{}", e);
            return Err(AssembleFailure::Parse);
        }
    };
    if diag.error_reported() {
        return Err(AssembleFailure::Parse);
    }

    if dump {
        print!("{}", program);
    }

    let mut eval = Evaluator::default();

    assembler::simplify_program(&mut program, &eval, &mut diag)
        .map_err(AssembleFailure::Internal)?;
    if diag.error_reported() {
        return Err(AssembleFailure::Layout);
    }

    if dump {
        print!("after eval:\n{}\n", program);
    }

    let layout = assembler::layout::layout_from(program, &mut eval, &mut diag)
        .map_err(AssembleFailure::Internal)?;
    if diag.error_reported() {
        return Err(AssembleFailure::Layout);
    }

    if dump {
        print!("after layout:\n{}\n", layout);
    }

    let image = assembler::generate_image(layout, &eval, format, &mut diag)
        .map_err(AssembleFailure::Internal)?;
    if diag.error_reported() {
        return Err(AssembleFailure::Layout);
    }

    Ok(image)
}
