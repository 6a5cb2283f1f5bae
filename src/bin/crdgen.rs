//! # CRD Generator
//!
//! Prints the CustomResourceDefinitions of the Stash resources as one
//! multi-document YAML stream.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/stash.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use stash_controller::crd::all_crds;

fn main() {
    for crd in all_crds() {
        match serde_yaml::to_string(&crd) {
            Ok(yaml) => {
                println!("---");
                print!("{yaml}");
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
}
