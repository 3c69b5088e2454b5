fn main() -> Result<(), Box<dyn std::error::Error>> {
    branchat::cli::main()
}
