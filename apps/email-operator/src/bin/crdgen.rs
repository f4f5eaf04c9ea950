//! Print the operator's CustomResourceDefinitions.
//!
//! ```bash
//! cargo run -p email_operator --bin crdgen | kubectl apply -f -
//! ```

use email_operator::{Email, EmailSenderConfig};
use eyre::Result;
use kube::CustomResourceExt;
use serde_json::json;

fn main() -> Result<()> {
    let list = json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": [Email::crd(), EmailSenderConfig::crd()],
    });
    println!("{}", serde_json::to_string_pretty(&list)?);
    Ok(())
}
