fn main() -> anyhow::Result<()> {
    ocrindex_lib::run()
}
