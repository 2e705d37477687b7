use {
    scfork_harness::{node::format_amount, ScenarioReport},
    std::fmt,
};

/// Human-readable rendering of a finished scenario.
pub struct CliScenarioReport<'a>(pub &'a ScenarioReport);

impl fmt::Display for CliScenarioReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        let sidechain = &report.fork_a_sidechain;
        writeln!(f, "Fork rollback scenario: passed")?;
        writeln!(f, "  Shared Height:        {}", report.shared_height)?;
        writeln!(f, "  Funding Tx:           {}", report.funding_tx)?;
        writeln!(f, "  Sidechain Creation:   {}", report.sidechain_creation_tx)?;
        writeln!(f, "  Conflicting Spend:    {}", report.conflicting_spend_tx)?;
        writeln!(f, "  Forward Transfer:     {}", report.forward_transfer_tx)?;
        writeln!(f)?;
        writeln!(f, "  Sidechain {} on fork A:", sidechain.scid)?;
        writeln!(
            f,
            "    Created At:         {} ({})",
            sidechain.created_at_height, sidechain.created_in_block
        )?;
        writeln!(f, "    Epoch Length:       {}", sidechain.epoch_length)?;
        writeln!(f, "    Balance:            {}", format_amount(sidechain.balance))?;
        for immature in &sidechain.immature_amounts {
            writeln!(
                f,
                "    Immature:           {} until {}",
                format_amount(immature.amount),
                immature.maturity_height
            )?;
        }
        writeln!(f)?;
        writeln!(f, "  Fork A Blocks:        {}", report.fork_a_blocks.len())?;
        writeln!(f, "  Fork B Blocks:        {}", report.fork_b_blocks.len())?;
        writeln!(f, "  Final Tip:            {}", report.final_tip)?;
        writeln!(f, "  Final Height:         {}", report.final_height)?;
        writeln!(f)?;
        writeln!(f, "  {:<8} {:>8} {:>8}  {:<12} Hash", "Node", "Height", "Branch", "Status")?;
        writeln!(f, "  {}", "-".repeat(82))?;
        for (node, tips) in &report.chain_tips {
            for tip in tips {
                writeln!(
                    f,
                    "  {:<8} {:>8} {:>8}  {:<12} {}",
                    node.to_string(),
                    tip.height,
                    tip.branch_len,
                    tip.status.to_string(),
                    tip.hash
                )?;
            }
        }
        Ok(())
    }
}
