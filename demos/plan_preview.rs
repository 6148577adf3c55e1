use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    strata::app::run_plan_preview(std::env::args().skip(1))
}
