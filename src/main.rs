fn main() -> anyhow::Result<()> {
    let command = gas_vendor_pos_lib::Command::parse(std::env::args().skip(1))?;
    gas_vendor_pos_lib::execute(command)
}
