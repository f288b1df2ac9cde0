//! PDF Signature Fields CLI
//!
//! Command-line interface for detecting signature fields and producing
//! signed PDFs.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use pdf_signfields::{
    add_completion_watermark, append_certificate, build_certificate_page, extract_text_runs,
    file_ops::{detect_fields_file, extract_pages_file, flatten_pdf_file, merge_pdf_files},
    Field, FilledField, FlattenOptions, Signer,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Detect signature fields in PDFs and flatten signed values into them
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the extracted text runs as JSON
    Runs {
        /// Input PDF file path
        input: PathBuf,
    },
    /// Print detected field locations as JSON
    Detect {
        /// Input PDF file path
        input: PathBuf,
        /// Print seeded fields with default sizes instead of raw locations
        #[arg(long)]
        fields: bool,
    },
    /// Burn filled field values into the PDF
    Flatten {
        /// Input PDF file path
        #[arg(short, long)]
        input: PathBuf,
        /// Output PDF file path
        #[arg(short, long)]
        output: PathBuf,
        /// JSON file with an array of fields, each carrying a `value`
        #[arg(long)]
        values: PathBuf,
        /// JPEG quality (1-100, only affects images without alpha)
        #[arg(short, long, default_value = "90")]
        quality: u8,
        /// Leave PDF streams uncompressed
        #[arg(long)]
        no_compress: bool,
    },
    /// Merge PDFs in the given order
    Merge {
        /// Output PDF file path
        #[arg(short, long)]
        output: PathBuf,
        /// Input PDF file paths
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Copy selected pages into a new PDF
    Extract {
        /// Input PDF file path
        #[arg(short, long)]
        input: PathBuf,
        /// Output PDF file path
        #[arg(short, long)]
        output: PathBuf,
        /// 1-based page numbers, e.g. 3,1,1
        #[arg(long, value_delimiter = ',', required = true)]
        pages: Vec<u32>,
    },
    /// Build a certificate-of-completion page
    Certificate {
        /// Output PDF file path
        #[arg(short, long)]
        output: PathBuf,
        /// Document title
        #[arg(long)]
        title: String,
        /// JSON file with an array of signers
        #[arg(long)]
        signers: PathBuf,
        /// Completion time (RFC 3339), defaults to now
        #[arg(long)]
        completed_at: Option<DateTime<Utc>>,
        /// Append the certificate to this PDF instead of writing it alone
        #[arg(long)]
        append_to: Option<PathBuf>,
    },
    /// Stamp "Signed on {label}" on the first page
    Watermark {
        /// Input PDF file path
        #[arg(short, long)]
        input: PathBuf,
        /// Output PDF file path
        #[arg(short, long)]
        output: PathBuf,
        /// Date label to print
        #[arg(long)]
        label: String,
    },
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {:?}", path))
}

fn read_pdf(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {:?}", path))
}

fn write_pdf(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("writing {:?}", path))?;
    println!("Output saved to: {:?}", path);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Runs { input } => {
            let pages = extract_text_runs(&read_pdf(&input)?)?;
            println!("{}", serde_json::to_string_pretty(&pages)?);
        }
        Command::Detect { input, fields } => {
            let locations = detect_fields_file(&input)?;
            if fields {
                let fields: Vec<Field> = locations.iter().map(Field::from_detected).collect();
                println!("{}", serde_json::to_string_pretty(&fields)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&locations)?);
            }
        }
        Command::Flatten {
            input,
            output,
            values,
            quality,
            no_compress,
        } => {
            let fields: Vec<FilledField> = read_json(&values)?;
            let options = FlattenOptions {
                image_quality: quality,
                compress_streams: !no_compress,
            };
            flatten_pdf_file(&input, &output, &fields, &options)?;
            println!("Flattened {} fields", fields.len());
            println!("Output saved to: {:?}", output);
        }
        Command::Merge { output, inputs } => {
            merge_pdf_files(&inputs, &output)?;
            println!("Merged {} documents", inputs.len());
            println!("Output saved to: {:?}", output);
        }
        Command::Extract { input, output, pages } => {
            extract_pages_file(&input, &output, &pages)?;
            println!("Output saved to: {:?}", output);
        }
        Command::Certificate {
            output,
            title,
            signers,
            completed_at,
            append_to,
        } => {
            let signers: Vec<Signer> = read_json(&signers)?;
            let completed_at = completed_at.unwrap_or_else(Utc::now);
            let pdf = match append_to {
                Some(original) => {
                    append_certificate(&read_pdf(&original)?, &title, &signers, completed_at)?
                }
                None => build_certificate_page(&title, &signers, completed_at)?,
            };
            write_pdf(&output, &pdf)?;
        }
        Command::Watermark { input, output, label } => {
            let pdf = add_completion_watermark(&read_pdf(&input)?, &label);
            write_pdf(&output, &pdf)?;
        }
    }

    Ok(())
}
