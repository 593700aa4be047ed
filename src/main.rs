use anyhow::Result;

fn main() -> Result<()> {
    dbf_test::cli::run()
}
