use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    strata::app::run_day_sample(std::env::args().skip(1))
}
