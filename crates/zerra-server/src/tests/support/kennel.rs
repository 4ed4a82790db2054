//! Pet-shop handlers used to drive the router.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::handler::{CallResponse, HandlerError, HandlerTable};

/// Provider type answering pet queries.
pub const PETS_PROVIDER: &str = "IPetsQueryProvider";
/// Command adopting a pet.
pub const ADOPT_PET: &str = "AdoptPet";
/// Command that parks on the gate before completing.
pub const SLOW_ADOPT: &str = "SlowAdopt";
/// Pet name the adoption handler refuses.
pub const GHOST: &str = "Ghost";
/// Length of the `StreamPets` payload; spans several copy buffers.
pub const STREAM_LEN: usize = 40_000;

/// Query result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pet {
    /// Pet name.
    pub name: String,
    /// Age in years.
    pub age: u32,
}

impl Pet {
    fn new(name: &str, age: u32) -> Self {
        Self {
            name: name.to_owned(),
            age,
        }
    }
}

/// Adoption command payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdoptPet {
    /// Name of the pet to adopt.
    pub name: String,
}

/// Deterministic bytes served by `StreamPets`.
#[must_use]
pub fn stream_payload() -> Vec<u8> {
    (0..STREAM_LEN)
        .map(|index| u8::try_from(index % 251).unwrap_or_default())
        .collect()
}

/// Shared handler state observed by the tests.
#[derive(Debug, Clone)]
pub struct Kennel {
    inner: Arc<KennelState>,
}

#[derive(Debug)]
struct KennelState {
    pets: Vec<Pet>,
    invocations: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    gate: Semaphore,
    adopted: Mutex<Vec<String>>,
    tokens: Mutex<Vec<CancellationToken>>,
}

impl Default for Kennel {
    fn default() -> Self {
        Self {
            inner: Arc::new(KennelState {
                pets: vec![Pet::new("Rex", 3), Pet::new("Tom", 5)],
                invocations: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                gate: Semaphore::new(0),
                adopted: Mutex::new(Vec::new()),
                tokens: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl Kennel {
    /// Pets every listing returns.
    #[must_use]
    pub fn pets(&self) -> Vec<Pet> {
        self.inner.pets.clone()
    }

    /// Handler invocations so far.
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.inner.invocations.load(Ordering::SeqCst)
    }

    /// Handlers currently running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Highest number of handlers observed running at once.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// Lets `count` gated handlers finish.
    pub fn open_gate(&self, count: usize) {
        self.inner.gate.add_permits(count);
    }

    /// Names adopted so far.
    #[must_use]
    pub fn adopted(&self) -> Vec<String> {
        self.inner
            .adopted
            .lock()
            .expect("adoption list mutex poisoned")
            .clone()
    }

    /// Cancellation token of the most recent gated query.
    #[must_use]
    pub fn last_token(&self) -> Option<CancellationToken> {
        self.inner
            .tokens
            .lock()
            .expect("token list mutex poisoned")
            .last()
            .cloned()
    }

    fn remember(&self, token: &CancellationToken) {
        self.inner
            .tokens
            .lock()
            .expect("token list mutex poisoned")
            .push(token.clone());
    }

    fn visit(&self) -> Visit {
        self.inner.invocations.fetch_add(1, Ordering::SeqCst);
        let now = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);
        Visit {
            kennel: self.clone(),
        }
    }

    async fn wait_at_gate(&self) {
        self.inner
            .gate
            .acquire()
            .await
            .expect("gate semaphore closed")
            .forget();
    }

    fn adopt(&self, name: String) {
        self.inner
            .adopted
            .lock()
            .expect("adoption list mutex poisoned")
            .push(name);
    }

    /// Handler table wiring every pet operation.
    #[must_use]
    pub fn table(&self) -> HandlerTable {
        let list = self.clone();
        let single = self.clone();
        let slow = self.clone();
        let stream = self.clone();
        let whoami = self.clone();
        let adopt = self.clone();
        let slow_adopt = self.clone();
        HandlerTable::new()
            .query(PETS_PROVIDER, "GetPets", move |_arguments, _context| {
                let kennel = list.clone();
                async move {
                    let _visit = kennel.visit();
                    Ok::<_, HandlerError>(kennel.pets())
                }
            })
            .query(PETS_PROVIDER, "GetPet", move |arguments, _context| {
                let kennel = single.clone();
                async move {
                    let _visit = kennel.visit();
                    let name: String = arguments.get(0)?;
                    kennel
                        .pets()
                        .into_iter()
                        .find(|pet| pet.name == name)
                        .ok_or_else(|| {
                            HandlerError::new("PetNotFound", format!("no pet named {name}"))
                        })
                }
            })
            .query(PETS_PROVIDER, "SlowPets", move |_arguments, context| {
                let kennel = slow.clone();
                async move {
                    let _visit = kennel.visit();
                    kennel.remember(context.cancellation());
                    kennel.wait_at_gate().await;
                    Ok::<_, HandlerError>(kennel.pets())
                }
            })
            .query_raw(PETS_PROVIDER, "StreamPets", move |_arguments, _context| {
                let kennel = stream.clone();
                async move {
                    let _visit = kennel.visit();
                    Ok(CallResponse::stream(std::io::Cursor::new(stream_payload())))
                }
            })
            .query(PETS_PROVIDER, "Whoami", move |_arguments, context| {
                let kennel = whoami.clone();
                async move {
                    let _visit = kennel.visit();
                    Ok::<_, HandlerError>(context.identity().name().map(str::to_owned))
                }
            })
            .command_with_result::<AdoptPet, String, _, _>(ADOPT_PET, move |command, _context| {
                let kennel = adopt.clone();
                async move {
                    let _visit = kennel.visit();
                    if command.name == GHOST {
                        return Err(HandlerError::new(
                            "AdoptionRefused",
                            format!("{GHOST} cannot be adopted"),
                        ));
                    }
                    kennel.adopt(command.name.clone());
                    Ok(format!("adopted {}", command.name))
                }
            })
            .command::<AdoptPet, _, _>(SLOW_ADOPT, move |command, _context| {
                let kennel = slow_adopt.clone();
                async move {
                    let _visit = kennel.visit();
                    kennel.wait_at_gate().await;
                    kennel.adopt(command.name);
                    Ok(())
                }
            })
    }
}

/// Marks one running handler; released on drop.
struct Visit {
    kennel: Kennel,
}

impl Drop for Visit {
    fn drop(&mut self) {
        self.kennel.inner.active.fetch_sub(1, Ordering::SeqCst);
    }
}
