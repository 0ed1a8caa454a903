fn main() {
    if let Err(err) = voicebank::cli::run_voicebank() {
        tracing::error!(error = %err, "voicebank failed");
        std::process::exit(1);
    }
}
