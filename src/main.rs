use ecclesia::core::error::ErrorKind;

fn main() {
    if let Err(err) = ecclesia::run() {
        let kind = err.kind();
        if kind == ErrorKind::Internal {
            tracing::error!(error = %err, "command failed");
        }
        let envelope = ecclesia::core::time::command_envelope(
            "error",
            "error",
            serde_json::json!({ "kind": kind.as_str(), "message": err.public_message() }),
        );
        match serde_json::to_string_pretty(&envelope) {
            Ok(text) => eprintln!("{}", text),
            Err(_) => eprintln!("{}: {}", kind.as_str(), err.public_message()),
        }
        std::process::exit(kind.exit_code());
    }
}
