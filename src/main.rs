fn main() -> anyhow::Result<()> {
    comply_tui::cli::run()
}
