fn main() -> anyhow::Result<()> {
    focuscoach_lib::run()
}
