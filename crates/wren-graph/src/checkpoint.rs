// Checkpoint: save and restore variable values
//
// Text format, built on the tensor format of `wren_core::io`:
//
//   0 3 7                  ids of the saved variables
//   2 3 1                  tensor of variable #0
//   0.1 -0.4 2.5
//   1 4                    tensor of variable #3
//   ...
//
// Restoring requires the same graph layout: every listed id must be a
// variable of the saved shape. Gradients are not saved.
//
// Usage:
//   checkpoint::save_variables("weights.txt", &graph)?;
//   checkpoint::load_variables("weights.txt", &mut graph)?;

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use wren_core::{write_tensor, Error, Result, TensorReader};

use crate::graph::Graph;
use crate::node::NodeId;

/// Write every variable of `graph` to `w`.
pub fn write_variables<W: Write>(w: &mut W, graph: &Graph) -> Result<()> {
    let ids: Vec<String> = graph
        .variables()
        .map(|(id, _)| id.index().to_string())
        .collect();
    writeln!(w, "{}", ids.join(" "))?;
    for (_, var) in graph.variables() {
        write_tensor(w, var.data())?;
    }
    Ok(())
}

/// Restore variable values written by [`write_variables`].
pub fn read_variables<R: BufRead>(r: R, graph: &mut Graph) -> Result<()> {
    let mut reader = TensorReader::new(r);
    let header = reader
        .next_line()?
        .ok_or_else(|| Error::parse(1, "empty checkpoint"))?;
    let ids = header
        .split_whitespace()
        .map(|f| {
            f.parse::<usize>()
                .map_err(|e| Error::parse(1, format!("bad variable id `{f}`: {e}")))
        })
        .collect::<Result<Vec<usize>>>()?;

    // validate everything before touching the graph
    let mut staged = Vec::with_capacity(ids.len());
    for index in ids {
        let id = NodeId(index);
        let tensor = reader.read_tensor()?;
        graph.get_variable(id)?.data().ensure_same_shape(&tensor)?;
        staged.push((id, tensor));
    }
    for (id, tensor) in staged {
        graph.get_variable_mut(id)?.set_data(tensor)?;
    }
    Ok(())
}

pub fn save_variables(path: impl AsRef<Path>, graph: &Graph) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write_variables(&mut w, graph)?;
    w.flush()?;
    Ok(())
}

pub fn load_variables(path: impl AsRef<Path>, graph: &mut Graph) -> Result<()> {
    read_variables(BufReader::new(File::open(path)?), graph)
}
