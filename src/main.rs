use anyhow::Result;

fn main() -> Result<()> {
    proxyhive::run()
}
