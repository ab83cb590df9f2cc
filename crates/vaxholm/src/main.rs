#![forbid(unsafe_code)]

//! Vaxholm CLI — XML Encryption operations (encrypt, decrypt).

mod loader;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use vaxholm_core::Error;
use vaxholm_enc::{Target, XmlEncCtx};
use vaxholm_keys::KeysManager;

#[derive(Parser)]
#[command(
    name = "vaxholm",
    about = "Vaxholm — Pure Rust XML Encryption (XML-Enc)",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt data into an EncryptedData template
    Encrypt {
        /// Template XML file (with an empty CipherValue)
        template: PathBuf,

        /// Binary file to encrypt
        #[arg(long, conflicts_with_all = ["xml", "uri"])]
        data: Option<PathBuf>,

        /// XML document whose element/content is encrypted in place
        #[arg(long, requires = "target")]
        xml: Option<PathBuf>,

        /// Target element name (or #id) inside the --xml document
        #[arg(long)]
        target: Option<String>,

        /// URI identifying the data to encrypt
        #[arg(long)]
        uri: Option<String>,

        /// Load raw AES key (binary file)
        #[arg(long = "aes-key")]
        aes_key: Vec<PathBuf>,

        /// Load raw 3DES key (binary file)
        #[arg(long = "des-key")]
        des_key: Vec<PathBuf>,

        /// Load RSA key (PEM)
        #[arg(long = "rsa-key")]
        rsa_key: Vec<PathBuf>,

        /// Load named raw key (NAME:FILE)
        #[arg(short = 'K', long = "key-name")]
        key_name: Vec<String>,

        /// Register additional ID attribute names
        #[arg(long = "id-attr")]
        id_attr: Vec<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Decrypt an encrypted XML document
    Decrypt {
        /// Input encrypted XML file
        file: PathBuf,

        /// Load raw AES key (binary file)
        #[arg(long = "aes-key")]
        aes_key: Vec<PathBuf>,

        /// Load raw 3DES key (binary file)
        #[arg(long = "des-key")]
        des_key: Vec<PathBuf>,

        /// Load RSA key (PEM)
        #[arg(long = "rsa-key")]
        rsa_key: Vec<PathBuf>,

        /// Load named raw key (NAME:FILE)
        #[arg(short = 'K', long = "key-name")]
        key_name: Vec<String>,

        /// Register additional ID attribute names
        #[arg(long = "id-attr")]
        id_attr: Vec<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Commands::Encrypt {
            template,
            data,
            xml,
            target,
            uri,
            aes_key,
            des_key,
            rsa_key,
            key_name,
            id_attr,
            output,
            verbose,
        } => {
            init_tracing(verbose);
            let keys = load_keys(&aes_key, &des_key, &rsa_key, &key_name)?;
            let template_xml = std::fs::read_to_string(&template)?;

            let mut ctx = XmlEncCtx::new(&keys);
            for attr in &id_attr {
                ctx.add_id_attr(attr);
            }
            if keys.len() == 1 {
                if let Ok(key) = keys.first_key() {
                    ctx.set_key(key.clone());
                }
            }

            let result = if let Some(data_file) = data {
                let payload = std::fs::read(&data_file)?;
                ctx.binary_encrypt(&template_xml, &payload)?
            } else if let Some(doc_file) = xml {
                let document = std::fs::read_to_string(&doc_file)?;
                let target = target.ok_or_else(|| {
                    Error::InvalidData("--xml requires --target".into())
                })?;
                let target = match target.strip_prefix('#') {
                    Some(id) => Target::Id(id),
                    None => Target::Element {
                        ns: "",
                        local: &target,
                    },
                };
                ctx.xml_encrypt(&template_xml, &document, target)?
            } else if let Some(uri) = uri {
                ctx.uri_encrypt(&template_xml, &uri)?
            } else {
                return Err(Error::InvalidData(
                    "one of --data, --xml or --uri is required".into(),
                ));
            };

            write_output(output.as_deref(), result.as_bytes())
        }

        Commands::Decrypt {
            file,
            aes_key,
            des_key,
            rsa_key,
            key_name,
            id_attr,
            output,
            verbose,
        } => {
            init_tracing(verbose);
            let keys = load_keys(&aes_key, &des_key, &rsa_key, &key_name)?;
            let document = std::fs::read_to_string(&file)?;

            let mut ctx = XmlEncCtx::new(&keys);
            for attr in &id_attr {
                ctx.add_id_attr(attr);
            }
            if keys.len() == 1 {
                if let Ok(key) = keys.first_key() {
                    ctx.set_key(key.clone());
                }
            }

            let plaintext = ctx.decrypt(&document)?;
            write_output(output.as_deref(), &plaintext)
        }
    }
}

fn init_tracing(verbose: bool) {
    if verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_keys(
    aes: &[PathBuf],
    des: &[PathBuf],
    rsa: &[PathBuf],
    named: &[String],
) -> Result<KeysManager, Error> {
    let mut keys = KeysManager::new();
    loader::load_into(&mut keys, aes, des, rsa, named)?;
    Ok(keys)
}

fn write_output(path: Option<&std::path::Path>, data: &[u8]) -> Result<(), Error> {
    use std::io::Write;
    match path {
        Some(p) => std::fs::write(p, data)?,
        None => std::io::stdout().write_all(data)?,
    }
    Ok(())
}
