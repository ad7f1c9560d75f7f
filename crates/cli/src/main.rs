//! Binary entry point; everything lives in the library's `run`.

fn main() -> anyhow::Result<()> {
    harnessync::run()
}
