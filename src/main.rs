use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    cambista::cli::main()
}
